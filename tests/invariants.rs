mod support;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use linkwise::constants::features::MISSING_VALUE;
use linkwise::constants::pipeline::PURPOSE_CLASSIFICATION;
use linkwise::corrector::threshold_and_dedup;
use linkwise::{
    CandidatePair, Classifier, ClassifierKind, EntityRecord, Field, FeatureMatrix,
    Hyperparameters, LinkModel, Linker, LinkerError, PairIndex, PostClassification, Prediction,
    RecordSet,
};

fn random_index(rng: &mut StdRng, size: usize) -> PairIndex {
    (0..size)
        .map(|_| {
            CandidatePair::new(
                format!("Q{}", rng.random_range(0..6)),
                format!("T{}", rng.random_range(0..6)),
            )
        })
        .collect()
}

#[test]
fn pair_index_set_algebra_holds() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let left = random_index(&mut rng, 12);
        let right = random_index(&mut rng, 12);
        let union = left.union(&right);
        let intersection = left.intersection(&right);

        let distinct: std::collections::BTreeSet<&CandidatePair> = union.iter().collect();
        assert_eq!(distinct.len(), union.len());
        assert!(intersection.iter().all(|pair| left.contains(pair) && right.contains(pair)));
        assert!(left.iter().all(|pair| union.contains(pair)));
        assert!(right.iter().all(|pair| union.contains(pair)));
        assert_eq!(union.len(), left.len() + right.len() - intersection.len());
    }
}

#[test]
fn chunked_classification_matches_a_single_pass() {
    let (dataset, catalog) = (support::dataset(16), support::catalog(16));
    let train_dir = tempdir().unwrap();
    let trainer = Linker::new(support::config(train_dir.path(), 100), "musicbrainz", "musician")
        .unwrap();
    let model = trainer
        .train(ClassifierKind::NaiveBayes, &Hyperparameters::default(), &dataset, &catalog)
        .unwrap();

    let mut runs = Vec::new();
    for chunk_size in [1, 3, 16, 100] {
        let dir = tempdir().unwrap();
        let linker =
            Linker::new(support::config(dir.path(), chunk_size), "musicbrainz", "musician")
                .unwrap();
        let mut predictions: Vec<Prediction> = Vec::new();
        linker
            .classify(&model, &dataset, &catalog, |_, chunk| {
                predictions.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        let cached = linker.cache(PURPOSE_CLASSIFICATION).load().unwrap().unwrap();
        runs.push((predictions, cached.features));
    }
    let (reference_predictions, reference_features) = &runs[0];
    assert_eq!(reference_predictions.len(), 16);
    for (predictions, features) in &runs[1..] {
        assert_eq!(predictions, reference_predictions);
        assert_eq!(features, reference_features);
    }
}

#[test]
fn narrow_matrices_are_padded_to_the_model_width() {
    let columns: Vec<String> = (0..4).map(|idx| format!("c{idx}")).collect();
    let pairs: Vec<CandidatePair> = (0..6)
        .map(|idx| CandidatePair::new(format!("Q{idx}"), format!("T{idx}")))
        .collect();
    let rows: Vec<Vec<f64>> = (0..6)
        .map(|idx| vec![f64::from(idx % 2 == 0), 0.3, 0.0, 1.0])
        .collect();
    let training = FeatureMatrix::from_rows(columns, pairs.clone(), rows).unwrap();
    let positives: PairIndex = pairs.iter().step_by(2).cloned().collect();
    let mut model = LinkModel::new(ClassifierKind::NaiveBayes, &Hyperparameters::default(), 1);
    model.fit(&training, &positives).unwrap();

    let narrow_rows = vec![vec![1.0, 0.5], vec![0.0, 0.25]];
    let mut narrow = FeatureMatrix::from_rows(
        vec!["c0".to_string(), "c1".to_string()],
        pairs[..2].to_vec(),
        narrow_rows.clone(),
    )
    .unwrap();
    assert_eq!(model.reconcile_width(&mut narrow).unwrap(), 2);
    assert_eq!(narrow.width(), 4);
    for (row, original) in narrow.rows().iter().zip(&narrow_rows) {
        assert_eq!(&row[..2], original.as_slice());
        assert!(row[2..].iter().all(|value| *value == MISSING_VALUE));
    }
    assert_eq!(model.probability(&narrow).unwrap().len(), 2);

    let mut wide = FeatureMatrix::from_rows(
        (0..5).map(|idx| format!("c{idx}")).collect(),
        pairs[..1].to_vec(),
        vec![vec![0.0; 5]],
    )
    .unwrap();
    assert!(matches!(
        model.reconcile_width(&mut wide),
        Err(LinkerError::FeatureWidth { expected: 4, actual: 5 })
    ));
}

#[test]
fn thresholding_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..20 {
        let predictions: Vec<Prediction> = (0..30)
            .map(|_| {
                Prediction::new(
                    CandidatePair::new(
                        format!("Q{}", rng.random_range(0..5)),
                        format!("T{}", rng.random_range(0..5)),
                    ),
                    rng.random_range(0.0..1.0),
                )
            })
            .collect();
        let once = threshold_and_dedup(predictions, 0.5);
        let twice = threshold_and_dedup(once.clone(), 0.5);
        assert_eq!(once, twice);
        assert!(once.iter().all(|prediction| prediction.score >= 0.5));
    }
}

fn correction_records() -> (RecordSet, RecordSet) {
    let source: RecordSet = [
        EntityRecord::new("Q42").with_names(["Douglas Adams"]),
        EntityRecord::new("Q7").with_names(["Douglas Adams"]),
    ]
    .into_iter()
    .collect();
    let target: RecordSet = [
        EntityRecord::new("T1")
            .with_names(["Douglas Adams"])
            .with_urls(["https://www.wikidata.org/wiki/Q42"]),
        EntityRecord::new("T2").with_names(["Someone Else"]),
    ]
    .into_iter()
    .collect();
    (source, target)
}

#[test]
fn disjoint_override_fields_veto_any_score() {
    let (source, target) = correction_records();
    let corrector = PostClassification::new(vec![Field::Name]);
    for raw in [0.0, 0.2, 0.5, 0.99, 1.0] {
        let mut predictions = vec![Prediction::new(CandidatePair::new("Q42", "T2"), raw)];
        corrector.apply(&mut predictions, &source, &target);
        assert_eq!(predictions[0].score, 0.0);
    }
}

#[test]
fn self_referencing_targets_force_the_score() {
    let (source, target) = correction_records();
    let mut predictions = vec![
        Prediction::new(CandidatePair::new("Q42", "T1"), 0.1),
        Prediction::new(CandidatePair::new("Q7", "T1"), 0.95),
    ];
    PostClassification::default().apply(&mut predictions, &source, &target);
    assert_eq!(predictions[0].score, 1.0);
    assert_eq!(predictions[1].score, 0.0);
}
