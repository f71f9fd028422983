use anyhow::Result;
use approx::assert_abs_diff_eq;
use multibox::{
    box_coder::{self, Variance},
    loss::{
        hard_negative_mining, match_priors, GroundTruth, MultiBoxLossInit, MultiBoxPrediction,
        FORCED_MATCH_OVERLAP,
    },
    prior_box::{PriorBoxConfig, SsdPriorBoxConfig},
};
use rand::prelude::*;
use tch_goodies::TlbrTensor;
use tch::{Device, Kind, Tensor};

fn random_truths(rng: &mut impl Rng, num_objects: usize) -> Vec<[f32; 4]> {
    (0..num_objects)
        .map(|_| {
            let xmin: f32 = rng.gen_range(0.0..0.9);
            let ymin: f32 = rng.gen_range(0.0..0.9);
            let w = rng.gen_range(0.01..(1.0 - xmin).min(0.5));
            let h = rng.gen_range(0.01..(1.0 - ymin).min(0.5));
            [xmin, ymin, xmin + w, ymin + h]
        })
        .collect()
}

#[test]
fn every_truth_receives_a_prior() -> Result<()> {
    let mut rng = rand::thread_rng();
    let priors = PriorBoxConfig::from(SsdPriorBoxConfig::ssd300()).build()?;
    let num_priors = priors.size()[0];

    for _ in 0..10 {
        let num_objects = rng.gen_range(1..8);
        let truths = random_truths(&mut rng, num_objects);
        let labels: Vec<i64> = (1..=num_objects as i64).collect();
        let truth = GroundTruth::from_slices(&truths, &labels)?;

        // a high threshold leaves only the forced matches
        let target = match_priors(
            0.99,
            truth.boxes(),
            &priors,
            Variance::default(),
            truth.labels(),
        )?;
        assert_eq!(target.conf().size(), vec![num_priors]);
        assert_eq!(target.loc().size(), vec![num_priors, 4]);

        let conf: Vec<i64> = Vec::from(target.conf());
        let overlap: Vec<f32> = Vec::from(target.overlap());
        let forced = overlap
            .iter()
            .filter(|&&value| value as f64 == FORCED_MATCH_OVERLAP)
            .count();
        assert!(forced >= 1 && forced <= num_objects);

        // a truth keeps its best prior unless a later truth picks the same one
        let overlaps = TlbrTensor::from_point_form(truth.boxes())?
            .iou_matrix_with(&TlbrTensor::from_point_form(&box_coder::point_form(&priors)?)?);
        let (_, best_priors) = overlaps.max_dim(1, false);
        let best_priors: Vec<i64> = Vec::from(&best_priors);
        best_priors.iter().enumerate().for_each(|(index, &prior)| {
            let is_taken = best_priors[(index + 1)..].contains(&prior);
            if !is_taken {
                assert_eq!(conf[prior as usize], labels[index]);
            }
        });
        let last_prior = best_priors[num_objects - 1] as usize;
        assert_eq!(conf[last_prior], labels[num_objects - 1]);
        assert!(conf.iter().all(|&label| label <= num_objects as i64));
    }

    Ok(())
}

#[test]
fn well_separated_truths_all_match() -> Result<()> {
    let priors = PriorBoxConfig::from(SsdPriorBoxConfig::ssd300()).build()?;
    let truths = [
        [0.02, 0.02, 0.12, 0.1],
        [0.7, 0.05, 0.98, 0.4],
        [0.1, 0.6, 0.5, 0.95],
        [0.45, 0.4, 0.55, 0.5],
    ];
    let labels = [1i64, 2, 3, 4];
    let truth = GroundTruth::from_slices(&truths, &labels)?;

    let target = match_priors(
        0.5,
        truth.boxes(),
        &priors,
        Variance::default(),
        truth.labels(),
    )?;
    let conf: Vec<i64> = Vec::from(target.conf());
    labels.iter().for_each(|label| {
        assert!(conf.contains(label), "label {} is not assigned", label);
    });
    Ok(())
}

#[test]
fn twelve_hardest_negatives_for_four_positives() -> Result<()> {
    let mut rng = rand::thread_rng();
    let num_priors = 64;

    let losses: Vec<f32> = (0..num_priors).map(|_| rng.gen_range(0.0..10.0)).collect();
    let positive_indexes = (0..num_priors).choose_multiple(&mut rng, 4);
    let positive: Vec<u8> = (0..num_priors)
        .map(|index| positive_indexes.contains(&index) as u8)
        .collect();

    let loss = Tensor::of_slice(&losses).view([1, num_priors as i64]);
    let positive = Tensor::of_slice(&positive)
        .view([1, num_priors as i64])
        .to_kind(Kind::Bool);
    let negative = hard_negative_mining(&loss, &positive, 3, None)?;
    let negative: Vec<u8> = Vec::from(&negative.to_kind(Kind::Uint8).view([-1]));

    let selected: Vec<usize> = (0..num_priors).filter(|&index| negative[index] != 0).collect();
    assert_eq!(selected.len(), 12);
    assert!(selected.iter().all(|index| !positive_indexes.contains(index)));

    let min_selected = selected
        .iter()
        .map(|&index| losses[index])
        .fold(f32::INFINITY, f32::min);
    let max_rejected = (0..num_priors)
        .filter(|index| !selected.contains(index) && !positive_indexes.contains(index))
        .map(|index| losses[index])
        .fold(f32::NEG_INFINITY, f32::max);
    assert!(min_selected >= max_rejected);
    Ok(())
}

#[test]
fn encode_decode_reproduces_boxes() -> Result<()> {
    let mut rng = rand::thread_rng();
    let priors = PriorBoxConfig::from(SsdPriorBoxConfig::refinedet320()).build()?;
    let num_priors = priors.size()[0];

    let truths: Vec<f32> = random_truths(&mut rng, num_priors as usize)
        .into_iter()
        .flatten()
        .collect();
    let truths = Tensor::of_slice(&truths).view([num_priors, 4]);

    let variance = Variance::default();
    let encoded = box_coder::encode(&truths, &priors, variance)?;
    let decoded = box_coder::decode(&encoded, &priors, variance)?;
    let diff = (decoded - &truths).abs().max().double_value(&[]);
    assert_abs_diff_eq!(diff, 0.0, epsilon = 1e-4);
    Ok(())
}

#[test]
fn binary_loss_with_mixed_batch() -> Result<()> {
    let priors = PriorBoxConfig::from(SsdPriorBoxConfig::refinedet320()).build()?;
    let num_priors = priors.size()[0];
    let options = (Kind::Float, Device::Cpu);
    let prediction = MultiBoxPrediction::new(
        Tensor::randn(&[2, num_priors, 4], options),
        Tensor::randn(&[2, num_priors, 2], options),
    )?;
    let targets = [
        GroundTruth::from_slices(&[[0.1, 0.1, 0.3, 0.4]], &[17])?,
        GroundTruth::empty(Device::Cpu),
    ];

    let loss_fn = MultiBoxLossInit::new(2).build()?;
    let output = loss_fn.forward(&prediction, &priors, &targets, false)?;
    assert!(output.num_positives >= 1);
    assert!(output.total_loss.double_value(&[]).is_finite());
    assert!(output.conf_loss.double_value(&[]) > 0.0);
    Ok(())
}
