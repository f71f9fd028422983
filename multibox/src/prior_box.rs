//! Prior (default anchor) box generation.
//!
//! Priors are produced as `[num_priors, 4]` center form tensors normalized by
//! the input image size.

use crate::common::*;

pub use prior_box_config::*;
pub use retina::*;
pub use ssd::*;

mod prior_box_config {
    use super::*;

    /// The prior geometry of a detector.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    pub enum PriorBoxConfig {
        /// SSD style priors with per-layer minimum/maximum sizes.
        Ssd(SsdPriorBoxConfig),
        /// RetinaNet style anchors with per-layer areas and scale ratios.
        Retina(RetinaAnchorConfig),
    }

    impl PriorBoxConfig {
        pub fn image_size(&self) -> usize {
            match self {
                Self::Ssd(config) => config.image_size,
                Self::Retina(config) => config.image_size,
            }
        }

        pub fn num_priors(&self) -> usize {
            match self {
                Self::Ssd(config) => config.num_priors(),
                Self::Retina(config) => config.num_priors(),
            }
        }

        pub fn validate(&self) -> Result<()> {
            match self {
                Self::Ssd(config) => config.validate(),
                Self::Retina(config) => config.validate(),
            }
        }

        /// Generate the prior tensor on CPU.
        pub fn build(&self) -> Result<Tensor> {
            let values = match self {
                Self::Ssd(config) => config.generate()?,
                Self::Retina(config) => config.generate()?,
            };
            let num_priors = (values.len() / 4) as i64;
            Ok(Tensor::of_slice(&values).view([num_priors, 4]))
        }
    }

    impl From<SsdPriorBoxConfig> for PriorBoxConfig {
        fn from(from: SsdPriorBoxConfig) -> Self {
            Self::Ssd(from)
        }
    }

    impl From<RetinaAnchorConfig> for PriorBoxConfig {
        fn from(from: RetinaAnchorConfig) -> Self {
            Self::Retina(from)
        }
    }

    pub(super) fn ensure_grid(
        image_size: usize,
        feature_maps: &[usize],
        steps: &[R64],
    ) -> Result<()> {
        ensure!(image_size > 0, "image_size must be positive");
        ensure!(!feature_maps.is_empty(), "feature_maps must not be empty");
        ensure!(
            feature_maps.len() == steps.len(),
            "feature_maps and steps must have the same length"
        );
        ensure!(
            feature_maps.iter().all(|&size| size > 0),
            "feature map sizes must be positive"
        );
        ensure!(
            steps.iter().all(|&step| step > 0.0),
            "steps must be positive"
        );
        Ok(())
    }

    /// Iterate over cell centers of a feature map in row-major order.
    pub(super) fn cell_centers(
        image_size: usize,
        feature_size: usize,
        step: R64,
    ) -> impl Iterator<Item = (f64, f64)> {
        let scale = image_size as f64 / step.raw();
        (0..feature_size)
            .cartesian_product(0..feature_size)
            .map(move |(row, col)| {
                let cx = (col as f64 + 0.5) / scale;
                let cy = (row as f64 + 0.5) / scale;
                (cx, cy)
            })
    }
}

mod ssd {
    use super::*;

    /// SSD style prior geometry.
    ///
    /// For every feature map cell it emits a square box of `min_size`, a square
    /// box of `sqrt(min_size * max_size)` if maximum sizes are given, and two
    /// boxes per aspect ratio `r` with ratios `r` and `1/r`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct SsdPriorBoxConfig {
        pub image_size: usize,
        pub feature_maps: Vec<usize>,
        pub steps: Vec<R64>,
        pub min_sizes: Vec<R64>,
        #[serde(default)]
        pub max_sizes: Option<Vec<R64>>,
        #[serde(default)]
        pub aspect_ratios: Vec<Vec<R64>>,
        #[serde(default = "default_clip")]
        pub clip: bool,
    }

    fn default_clip() -> bool {
        true
    }

    impl SsdPriorBoxConfig {
        pub fn ssd300() -> Self {
            Self {
                image_size: 300,
                feature_maps: vec![38, 19, 10, 5, 3, 1],
                steps: r64_vec(&[8.0, 16.0, 32.0, 64.0, 100.0, 300.0]),
                min_sizes: r64_vec(&[30.0, 60.0, 111.0, 162.0, 213.0, 264.0]),
                max_sizes: Some(r64_vec(&[60.0, 111.0, 162.0, 213.0, 264.0, 315.0])),
                aspect_ratios: vec![
                    r64_vec(&[2.0]),
                    r64_vec(&[2.0, 3.0]),
                    r64_vec(&[2.0, 3.0]),
                    r64_vec(&[2.0, 3.0]),
                    r64_vec(&[2.0]),
                    r64_vec(&[2.0]),
                ],
                clip: true,
            }
        }

        pub fn ssd512() -> Self {
            Self {
                image_size: 512,
                feature_maps: vec![64, 32, 16, 8, 4, 2, 1],
                steps: r64_vec(&[8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0]),
                min_sizes: r64_vec(&[35.84, 76.8, 153.6, 230.4, 307.2, 384.0, 460.8]),
                max_sizes: Some(r64_vec(&[
                    76.8, 153.6, 230.4, 307.2, 384.0, 460.8, 537.6,
                ])),
                aspect_ratios: vec![
                    r64_vec(&[2.0]),
                    r64_vec(&[2.0, 3.0]),
                    r64_vec(&[2.0, 3.0]),
                    r64_vec(&[2.0, 3.0]),
                    r64_vec(&[2.0, 3.0]),
                    r64_vec(&[2.0]),
                    r64_vec(&[2.0]),
                ],
                clip: true,
            }
        }

        pub fn refinedet320() -> Self {
            Self {
                image_size: 320,
                feature_maps: vec![40, 20, 10, 5],
                steps: r64_vec(&[8.0, 16.0, 32.0, 64.0]),
                min_sizes: r64_vec(&[32.0, 64.0, 128.0, 256.0]),
                max_sizes: None,
                aspect_ratios: vec![
                    r64_vec(&[2.0]),
                    r64_vec(&[2.0]),
                    r64_vec(&[2.0]),
                    r64_vec(&[2.0]),
                ],
                clip: true,
            }
        }

        pub fn s3fd640() -> Self {
            Self {
                image_size: 640,
                feature_maps: vec![160, 80, 40, 20, 10, 5],
                steps: r64_vec(&[4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
                min_sizes: r64_vec(&[16.0, 32.0, 64.0, 128.0, 256.0, 512.0]),
                max_sizes: None,
                aspect_ratios: vec![vec![]; 6],
                clip: false,
            }
        }

        pub fn validate(&self) -> Result<()> {
            let Self {
                image_size,
                ref feature_maps,
                ref steps,
                ref min_sizes,
                ref max_sizes,
                ref aspect_ratios,
                ..
            } = *self;

            ensure_grid(image_size, feature_maps, steps)?;
            let num_layers = feature_maps.len();
            ensure!(
                min_sizes.len() == num_layers,
                "min_sizes must have {} entries",
                num_layers
            );
            ensure!(
                min_sizes.iter().all(|&size| size > 0.0),
                "min_sizes must be positive"
            );
            if let Some(max_sizes) = max_sizes {
                ensure!(
                    max_sizes.len() == num_layers,
                    "max_sizes must have {} entries",
                    num_layers
                );
                ensure!(
                    izip!(min_sizes, max_sizes).all(|(min, max)| min <= max),
                    "max_sizes must not be less than min_sizes"
                );
            }
            ensure!(
                aspect_ratios.len() == num_layers,
                "aspect_ratios must have {} entries",
                num_layers
            );
            ensure!(
                aspect_ratios.iter().flatten().all(|&ratio| ratio > 0.0),
                "aspect ratios must be positive"
            );
            Ok(())
        }

        pub fn num_priors(&self) -> usize {
            let with_max = self.max_sizes.is_some() as usize;
            izip!(&self.feature_maps, &self.aspect_ratios)
                .map(|(&size, ratios)| size * size * (1 + with_max + 2 * ratios.len()))
                .sum()
        }

        pub(super) fn generate(&self) -> Result<Vec<f32>> {
            self.validate()?;
            let image_size = self.image_size as f64;

            let values: Vec<f32> = self
                .feature_maps
                .iter()
                .enumerate()
                .flat_map(|(layer, &feature_size)| {
                    let min_size = self.min_sizes[layer].raw() / image_size;
                    let max_size = self
                        .max_sizes
                        .as_ref()
                        .map(|sizes| sizes[layer].raw() / image_size);
                    let ratios = &self.aspect_ratios[layer];

                    cell_centers(self.image_size, feature_size, self.steps[layer]).flat_map(
                        move |(cx, cy)| {
                            let square = iter::once([cx, cy, min_size, min_size]);
                            let large = max_size.map(|max_size| {
                                let size = (min_size * max_size).sqrt();
                                [cx, cy, size, size]
                            });
                            let rect = ratios.iter().flat_map(move |ratio| {
                                let ratio = ratio.raw().sqrt();
                                [
                                    [cx, cy, min_size * ratio, min_size / ratio],
                                    [cx, cy, min_size / ratio, min_size * ratio],
                                ]
                            });
                            square.chain(large).chain(rect)
                        },
                    )
                })
                .flat_map(|prior| {
                    prior.map(|value| {
                        let value = if self.clip {
                            value.clamp(0.0, 1.0)
                        } else {
                            value
                        };
                        value as f32
                    })
                })
                .collect();

            debug_assert_eq!(values.len(), self.num_priors() * 4);
            Ok(values)
        }
    }
}

mod retina {
    use super::*;

    /// RetinaNet style anchor geometry.
    ///
    /// Every feature map cell carries `aspect_ratios.len() * scale_ratios.len()`
    /// anchors of area `anchor_areas[layer] * scale^2`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct RetinaAnchorConfig {
        pub image_size: usize,
        pub feature_maps: Vec<usize>,
        pub steps: Vec<R64>,
        pub anchor_areas: Vec<R64>,
        pub aspect_ratios: Vec<R64>,
        pub scale_ratios: Vec<R64>,
    }

    impl RetinaAnchorConfig {
        pub fn retinanet512() -> Self {
            Self {
                image_size: 512,
                feature_maps: vec![64, 32, 16, 8, 4],
                steps: r64_vec(&[8.0, 16.0, 32.0, 64.0, 128.0]),
                anchor_areas: r64_vec(&[
                    32.0 * 32.0,
                    64.0 * 64.0,
                    128.0 * 128.0,
                    256.0 * 256.0,
                    512.0 * 512.0,
                ]),
                aspect_ratios: r64_vec(&[0.5, 1.0, 2.0]),
                scale_ratios: r64_vec(&[1.0, 2f64.powf(1.0 / 3.0), 2f64.powf(2.0 / 3.0)]),
            }
        }

        pub fn validate(&self) -> Result<()> {
            let Self {
                image_size,
                ref feature_maps,
                ref steps,
                ref anchor_areas,
                ref aspect_ratios,
                ref scale_ratios,
            } = *self;

            ensure_grid(image_size, feature_maps, steps)?;
            ensure!(
                anchor_areas.len() == feature_maps.len(),
                "anchor_areas must have {} entries",
                feature_maps.len()
            );
            ensure!(
                anchor_areas.iter().all(|&area| area > 0.0),
                "anchor areas must be positive"
            );
            ensure!(
                !aspect_ratios.is_empty() && aspect_ratios.iter().all(|&ratio| ratio > 0.0),
                "aspect_ratios must be non-empty and positive"
            );
            ensure!(
                !scale_ratios.is_empty() && scale_ratios.iter().all(|&ratio| ratio > 0.0),
                "scale_ratios must be non-empty and positive"
            );
            Ok(())
        }

        pub fn num_priors(&self) -> usize {
            let per_cell = self.aspect_ratios.len() * self.scale_ratios.len();
            self.feature_maps
                .iter()
                .map(|&size| size * size * per_cell)
                .sum()
        }

        pub(super) fn generate(&self) -> Result<Vec<f32>> {
            self.validate()?;
            let image_size = self.image_size as f64;

            let values: Vec<f32> = self
                .feature_maps
                .iter()
                .enumerate()
                .flat_map(|(layer, &feature_size)| {
                    let area = self.anchor_areas[layer].raw();
                    let shapes: Vec<(f64, f64)> = self
                        .aspect_ratios
                        .iter()
                        .cartesian_product(&self.scale_ratios)
                        .map(|(ratio, scale)| {
                            let h = (area / ratio.raw()).sqrt();
                            let w = ratio.raw() * h;
                            (
                                w * scale.raw() / image_size,
                                h * scale.raw() / image_size,
                            )
                        })
                        .collect();

                    cell_centers(self.image_size, feature_size, self.steps[layer]).flat_map(
                        move |(cx, cy)| {
                            shapes
                                .clone()
                                .into_iter()
                                .flat_map(move |(w, h)| [cx, cy, w, h])
                        },
                    )
                })
                .map(|value| value as f32)
                .collect();

            debug_assert_eq!(values.len(), self.num_priors() * 4);
            Ok(values)
        }
    }
}

fn r64_vec(values: &[f64]) -> Vec<R64> {
    values.iter().cloned().map(r64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn prior_counts() -> Result<()> {
        let configs: [(PriorBoxConfig, i64); 5] = [
            (SsdPriorBoxConfig::ssd300().into(), 8732),
            (SsdPriorBoxConfig::ssd512().into(), 24564),
            (SsdPriorBoxConfig::refinedet320().into(), 6375),
            (SsdPriorBoxConfig::s3fd640().into(), 34125),
            (RetinaAnchorConfig::retinanet512().into(), 49104),
        ];

        configs.iter().try_for_each(|(config, expect)| -> Result<_> {
            assert_eq!(config.num_priors() as i64, *expect);
            let priors = config.build()?;
            assert_eq!(priors.size(), vec![*expect, 4]);
            Ok(())
        })?;

        Ok(())
    }

    #[test]
    fn ssd_first_cell_priors() -> Result<()> {
        let priors = PriorBoxConfig::from(SsdPriorBoxConfig::ssd300()).build()?;
        let first: Vec<f32> = Vec::from(&priors.i((0..4, ..)).reshape(&[-1]));

        let center = 0.5 / (300.0 / 8.0);
        let min_size = 30.0 / 300.0;
        let large = (min_size * 60.0 / 300.0f64).sqrt();
        let wide = min_size * 2f64.sqrt();
        let tall = min_size / 2f64.sqrt();
        let expect = [
            center, center, min_size, min_size, //
            center, center, large, large, //
            center, center, wide, tall, //
            center, center, tall, wide,
        ];

        first.iter().zip(expect).for_each(|(&actual, expect)| {
            assert_abs_diff_eq!(actual as f64, expect, epsilon = 1e-6);
        });
        Ok(())
    }

    #[test]
    fn clipped_priors_stay_in_unit_range() -> Result<()> {
        let priors = PriorBoxConfig::from(SsdPriorBoxConfig::ssd300()).build()?;
        assert!(priors.min().double_value(&[]) >= 0.0);
        assert!(priors.max().double_value(&[]) <= 1.0);
        Ok(())
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let mut config = SsdPriorBoxConfig::ssd300();
        config.steps.pop();
        assert!(PriorBoxConfig::from(config).build().is_err());

        let mut config = RetinaAnchorConfig::retinanet512();
        config.scale_ratios.clear();
        assert!(PriorBoxConfig::from(config).build().is_err());
    }

    #[test]
    fn prior_config_serde_test() -> Result<()> {
        let text = r#"{
            kind: "Ssd",
            image_size: 320,
            feature_maps: [40, 20, 10, 5],
            steps: [8, 16, 32, 64],
            min_sizes: [32, 64, 128, 256],
            aspect_ratios: [[2], [2], [2], [2]],
        }"#;
        let config: PriorBoxConfig = json5::from_str(text)?;
        assert_eq!(config, SsdPriorBoxConfig::refinedet320().into());
        Ok(())
    }
}
