use tier_analytics::config::ClassificationBand;
use tier_analytics::models::{
    AcademicResult, EntityKey, EntityKind, Indicator, IndicatorScore, MetricKind,
    MovementCategory, Observation, PeerDimension, Tier,
};
use tier_analytics::summary::split_entity_summaries;
use tier_analytics::{run, AnalysisConfig, AnalysisError, AnalysisInput, ConfigError, Diagnostic};

fn indicator(id: &str, domain: &str, tier: Tier) -> Indicator {
    Indicator {
        id: id.to_string(),
        domain: domain.to_string(),
        tier,
        question: None,
    }
}

fn indicators() -> Vec<Indicator> {
    vec![
        indicator("le-1", "LE", Tier::Tier1),
        indicator("le-2", "LE", Tier::Tier1),
        indicator("le-3", "LE", Tier::Tier2),
        indicator("kpc-1", "KPC", Tier::Tier1),
        indicator("kpc-2", "KPC", Tier::Tier2),
    ]
}

fn observation(id: &str, fellow: &str, term: &str, scores: &[(&str, f64)]) -> Observation {
    Observation {
        id: id.to_string(),
        fellow_id: fellow.to_string(),
        coach_id: Some("coach-a".to_string()),
        school_id: Some("school-1".to_string()),
        class_id: Some(format!("class-{fellow}")),
        cohort: Some("2025".to_string()),
        grade: Some("4".to_string()),
        subject: Some("Maths".to_string()),
        term: term.to_string(),
        observed_on: None,
        scores: scores
            .iter()
            .map(|(indicator_id, score)| IndicatorScore {
                indicator_id: indicator_id.to_string(),
                score: Some(*score),
            })
            .collect(),
    }
}

fn academic(class: &str, term: &str, average: f64) -> AcademicResult {
    AcademicResult {
        class_id: class.to_string(),
        fellow_id: None,
        coach_id: None,
        cohort: None,
        grade: None,
        subject: None,
        term: term.to_string(),
        average: Some(average),
        class_size: None,
    }
}

fn class_key(id: &str) -> EntityKey {
    EntityKey::new(EntityKind::Class, id)
}

#[test]
fn aggregates_an_observation_into_domain_scores() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: vec![observation(
            "o1",
            "f1",
            "Term 1",
            &[("le-1", 2.0), ("le-2", 4.0), ("le-3", 5.0)],
        )],
        academic_results: Vec::new(),
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    assert_eq!(output.domain_scores.len(), 1);
    let score = &output.domain_scores[0];
    assert!((score.domain_average - 11.0 / 3.0).abs() < 1e-9);
    assert_eq!(score.strongest_tier, Tier::Tier2);
    assert_eq!(score.weakest_tier, Tier::Tier1);
    assert_eq!(output.diagnostics.count_of("malformed_score"), 0);
    assert_eq!(output.diagnostics.count_of("missing_reference_data"), 0);
}

#[test]
fn classifies_growth_between_terms() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: Vec::new(),
        academic_results: vec![academic("k1", "Term 1", 55.0), academic("k1", "Term 2", 70.0)],
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    let movement = output
        .movements
        .iter()
        .find(|m| m.entity == class_key("k1") && m.metric == MetricKind::AcademicAverage)
        .unwrap();
    assert_eq!(movement.from_term, "Term 1");
    assert_eq!(movement.to_term, "Term 2");
    assert_eq!(movement.category, MovementCategory::Improved);
    assert_eq!(movement.label, "high-growth");
    assert!((movement.delta - 15.0).abs() < 1e-9);
}

#[test]
fn a_missing_second_term_is_reported_not_recorded() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: Vec::new(),
        academic_results: vec![
            academic("k1", "Term 1", 55.0),
            academic("k1", "Term 2", 60.0),
            academic("k2", "Term 1", 48.0),
        ],
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    assert!(output.movements.iter().all(|m| m.entity != class_key("k2")));
    let incomplete: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| {
            matches!(d, Diagnostic::IncompleteTermPair { entity, missing_term, .. }
                if *entity == class_key("k2") && missing_term == "Term 2")
        })
        .collect();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(output.diagnostics.count_of("incomplete_term_pair"), 1);
}

#[test]
fn invalid_configuration_fails_the_run() {
    let mut config = AnalysisConfig::default();
    config.classification.bands = vec![
        ClassificationBand {
            label: "Low".to_string(),
            min_domain_average: 1.0,
            tier_minimums: Vec::new(),
        },
        ClassificationBand {
            label: "High".to_string(),
            min_domain_average: 4.0,
            tier_minimums: Vec::new(),
        },
    ];
    let input = AnalysisInput {
        indicators: indicators(),
        observations: vec![observation("o1", "f1", "Term 1", &[("le-1", 3.0)])],
        academic_results: Vec::new(),
    };

    let err = run(&input, &config).unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::Configuration(ConfigError::NonMonotonicClassification { .. })
    ));
}

#[test]
fn bad_records_only_affect_their_own_group() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: vec![
            observation("o1", "f1", "Term 1", &[("le-1", 3.0), ("le-2", 12.0)]),
            observation("o2", "f2", "Term 1", &[("le-1", 3.0), ("ghost", 2.0)]),
            observation("o3", "f3", "Term 1", &[("kpc-1", 4.0), ("kpc-2", 4.0)]),
        ],
        academic_results: Vec::new(),
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    assert!(output.domain_scores.iter().all(|s| s.fellow_id != "f1"));
    assert_eq!(output.domain_scores.len(), 2);
    assert_eq!(output.diagnostics.count_of("malformed_score"), 1);
    assert_eq!(output.diagnostics.count_of("missing_reference_data"), 1);

    let f1_mix = output
        .mixes
        .iter()
        .find(|m| m.key.entity == EntityKey::fellow("f1") && m.key.domain.is_none())
        .unwrap();
    assert!(f1_mix.no_data);
    assert_eq!(f1_mix.mix_index, None);
    assert!(f1_mix.buckets.iter().all(|b| b.percentage.is_none()));
}

#[test]
fn cohort_mix_percentages_cover_every_domain_score() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: vec![
            observation("o1", "f1", "Term 1", &[("le-1", 4.5), ("kpc-1", 1.0)]),
            observation("o2", "f2", "Term 1", &[("le-1", 3.0), ("kpc-1", 2.5)]),
        ],
        academic_results: Vec::new(),
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    let cohort = output
        .cohort_summaries
        .iter()
        .find(|s| s.cohort == "2025" && s.term == "Term 1")
        .unwrap();
    let mix = cohort.mix.as_ref().unwrap();
    assert_eq!(mix.total, 4);
    let sum: f64 = mix.buckets.iter().filter_map(|b| b.percentage).sum();
    assert!((sum - 100.0).abs() < 1e-9);
    assert_eq!(mix.percentage_of("Exemplary"), Some(25.0));
    assert_eq!(mix.percentage_of("Proficient"), Some(25.0));
    assert_eq!(mix.percentage_of("Developing"), Some(25.0));
    assert_eq!(mix.percentage_of("Emerging"), Some(25.0));
    assert!(cohort.movement.is_none());
}

#[test]
fn fellows_are_normalized_against_their_coach_group() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: vec![
            observation("o1", "f1", "Term 1", &[("le-1", 2.0)]),
            observation("o2", "f2", "Term 1", &[("le-1", 3.0)]),
            observation("o3", "f3", "Term 1", &[("le-1", 4.0)]),
        ],
        academic_results: Vec::new(),
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    let summary = output
        .fellow_summaries
        .iter()
        .find(|s| s.entity == EntityKey::fellow("f3"))
        .unwrap();
    let coach = summary.peers.coach.as_ref().unwrap();
    assert_eq!(coach.population, 3);
    assert!((coach.peer_mean - 3.0).abs() < 1e-9);
    assert!(coach.z_score > 0.0);
    assert!((coach.deviation - 1.0).abs() < 1e-9);
    assert!(!coach.insufficient_population);

    // Each fellow teaches their own class, so the class group has one member.
    let class = summary.peers.class.as_ref().unwrap();
    assert!(class.insufficient_population);
    assert_eq!(class.z_score, 0.0);
    assert_eq!(class.percentile_rank, 50.0);
    assert_eq!(output.diagnostics.count_of("insufficient_peer_population"), 3);
    assert!(output
        .peer_statistics
        .iter()
        .all(|p| p.dimension != PeerDimension::Class || p.population == 1));
}

#[test]
fn three_terms_yield_a_trajectory_and_a_latest_term_risk() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: vec![
            observation("o1", "f1", "Term 1", &[("le-1", 4.0)]),
            observation("o2", "f1", "Term 2", &[("le-1", 3.0)]),
            observation("o3", "f1", "Term 3", &[("le-1", 2.0)]),
        ],
        academic_results: Vec::new(),
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    assert_eq!(output.terms, vec!["Term 1", "Term 2", "Term 3"]);
    let trajectory = output
        .trajectories
        .iter()
        .find(|t| {
            t.entity == EntityKey::fellow("f1")
                && t.metric == MetricKind::DomainAverage
                && t.domain.is_none()
        })
        .unwrap();
    assert_eq!(trajectory.values, vec![4.0, 3.0, 2.0]);
    assert!(trajectory.slope < 0.0);
    assert_eq!(trajectory.latest, 2.0);

    let latest = output
        .fellow_summaries
        .iter()
        .find(|s| s.entity == EntityKey::fellow("f1") && s.term == "Term 3")
        .unwrap();
    let risk = latest.risk.as_ref().unwrap();
    assert_eq!(risk.terms_observed, 3);
    assert!(risk.trend < 0.0);
    assert!(output
        .fellow_summaries
        .iter()
        .filter(|s| s.term != "Term 3")
        .all(|s| s.risk.is_none()));
}

#[test]
fn cohort_academic_average_is_weighted_by_class_size() {
    let mut small = academic("k1", "Term 1", 80.0);
    small.cohort = Some("2025".to_string());
    small.class_size = Some(10);
    let mut large = academic("k2", "Term 1", 40.0);
    large.cohort = Some("2025".to_string());
    large.class_size = Some(30);
    let mut next = academic("k1", "Term 2", 60.0);
    next.cohort = Some("2025".to_string());
    next.class_size = Some(10);

    let input = AnalysisInput {
        indicators: indicators(),
        observations: Vec::new(),
        academic_results: vec![small, large, next],
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    let cohort = output
        .cohort_summaries
        .iter()
        .find(|s| s.cohort == "2025" && s.term == "Term 2")
        .unwrap();
    let movement = cohort.academic_movement.as_ref().unwrap();
    assert!((movement.from_value - 50.0).abs() < 1e-9);
    assert!((movement.to_value - 60.0).abs() < 1e-9);
    assert_eq!(movement.category, MovementCategory::Improved);
    assert_eq!(movement.label, "high-growth");
}

#[test]
fn repeated_runs_are_identical() {
    let input = AnalysisInput {
        indicators: indicators(),
        observations: vec![
            observation("o1", "f1", "Term 1", &[("le-1", 2.0), ("kpc-1", 3.5)]),
            observation("o2", "f2", "Term 1", &[("le-1", 3.0), ("kpc-2", 4.0)]),
            observation("o3", "f1", "Term 2", &[("le-1", 3.5), ("kpc-1", 3.0)]),
            observation("o4", "f2", "Term 2", &[("le-1", 1.5)]),
            observation("o5", "f1", "Term 3", &[("le-2", 4.5)]),
        ],
        academic_results: vec![academic("k1", "Term 1", 55.0), academic("k1", "Term 3", 45.0)],
    };
    let config = AnalysisConfig::default();

    let first = run(&input, &config).unwrap();
    let second = run(&input, &config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn subject_rows_for_one_class_collapse_before_peer_comparison() {
    let row = |class: &str, subject: &str, average: f64| {
        let mut result = academic(class, "Term 1", average);
        result.grade = Some("4".to_string());
        result.subject = Some(subject.to_string());
        result
    };
    let input = AnalysisInput {
        indicators: indicators(),
        observations: Vec::new(),
        academic_results: vec![
            row("k1", "Maths", 40.0),
            row("k1", "English", 80.0),
            row("k2", "Maths", 60.0),
        ],
    };
    let output = run(&input, &AnalysisConfig::default()).unwrap();

    let k1_grade: Vec<_> = output
        .peer_statistics
        .iter()
        .filter(|p| p.entity == class_key("k1") && p.dimension == PeerDimension::Grade)
        .collect();
    assert_eq!(k1_grade.len(), 1);
    assert_eq!(k1_grade[0].population, 2);
    assert!((k1_grade[0].value - 60.0).abs() < 1e-9);
    assert!((k1_grade[0].peer_mean - 60.0).abs() < 1e-9);
    assert_eq!(k1_grade[0].deviation, 0.0);

    let k1_subject = output
        .peer_statistics
        .iter()
        .find(|p| p.entity == class_key("k1") && p.dimension == PeerDimension::Subject)
        .unwrap();
    assert_eq!(k1_subject.peer_group, "English");

    let risk = output
        .risks
        .iter()
        .find(|r| r.entity == class_key("k1"))
        .unwrap();
    assert_eq!(risk.current, k1_grade[0].value);

    let parts = split_entity_summaries(&output.class_summaries);
    assert_eq!(output.peer_statistics.len(), 4);
    assert_eq!(parts.peers.len(), output.peer_statistics.len());
}
