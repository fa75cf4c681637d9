use std::{collections::BTreeMap, fs, path::Path};

use ab_testing::assignment::decide;
use ab_testing::{ExclusionReason, Test};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

use crate::Result;
use crate::loader::Catalog;

/// Output format for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Writes every definition as one JSON array sorted by id.
/// Returns the number of definitions written.
pub fn write_bundle(out_path: &Path, catalog: &Catalog) -> Result<usize> {
    let sorted: BTreeMap<&str, &Value> = catalog
        .definitions
        .iter()
        .map(|d| (d.id.as_str(), &d.value))
        .collect();
    let bundle: Vec<&Value> = sorted.into_values().collect();

    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(out_path, serde_json::to_string_pretty(&bundle)?)?;
    Ok(bundle.len())
}

/// Stateless bucketing of one subject into one test
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignReport {
    pub test_id: String,
    pub subject_id: String,
    pub salt: String,
    pub traffic_bucket: u32,
    pub variant_bucket: Option<u32>,
    pub in_test: bool,
    pub variant_id: Option<String>,
    pub exclusion: Option<ExclusionReason>,
}

pub fn assign(test: &Test, subject_id: &str, salt: &str) -> AssignReport {
    let decision = decide(test, subject_id, salt);
    let exclusion = if !test.is_running() {
        Some(ExclusionReason::NotRunning)
    } else if !decision.in_test() {
        Some(ExclusionReason::TrafficAllocation)
    } else {
        None
    };
    AssignReport {
        test_id: test.id.clone(),
        subject_id: subject_id.to_string(),
        salt: salt.to_string(),
        traffic_bucket: decision.traffic_bucket,
        variant_bucket: decision.variant_bucket,
        in_test: exclusion.is_none(),
        variant_id: decision
            .variant
            .filter(|_| exclusion.is_none())
            .map(|v| v.id.clone()),
        exclusion,
    }
}

pub fn render_assign(report: &AssignReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }
    let mut out = format!(
        "test: {}\nsubject: {}\ntraffic bucket: {}\n",
        report.test_id, report.subject_id, report.traffic_bucket
    );
    if let Some(bucket) = report.variant_bucket {
        out.push_str(&format!("variant bucket: {bucket}\n"));
    }
    match (&report.variant_id, report.exclusion) {
        (Some(variant), _) => out.push_str(&format!("variant: {variant}\n")),
        (None, Some(reason)) => out.push_str(&format!("not in test ({reason:?})\n")),
        (None, None) => out.push_str("not in test\n"),
    }
    Ok(out)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantShare {
    pub variant_id: String,
    /// Share of in-test subjects the weights predict
    pub expected: f64,
    pub assigned: usize,
    pub actual: f64,
}

/// Population distribution over synthetic subject ids `subject-0..N`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub test_id: String,
    pub salt: String,
    pub subjects: usize,
    pub in_test: usize,
    pub expected_in_test: f64,
    pub variants: Vec<VariantShare>,
    pub generated_at: String,
}

/// Whole buckets in `[0, 100)` lying below `edge`
fn buckets_below(edge: f64) -> f64 {
    edge.clamp(0.0, 100.0).ceil()
}

/// Share of the bucket range each variant covers once the cumulative walk
/// over integer buckets and the fallback for uncovered buckets are applied
pub fn expected_shares(test: &Test) -> Vec<f64> {
    let mut shares = Vec::with_capacity(test.variants.len());
    let mut cumulative: f64 = 0.0;
    for variant in &test.variants {
        let start = buckets_below(cumulative);
        cumulative += variant.weight;
        shares.push((buckets_below(cumulative) - start).max(0.0) / 100.0);
    }
    let uncovered = (100.0 - buckets_below(cumulative)) / 100.0;
    let fallback = test
        .fallback_variant()
        .and_then(|f| test.variants.iter().position(|v| v.id == f.id));
    if let Some(index) = fallback {
        shares[index] += uncovered;
    }
    shares
}

pub fn simulate(test: &Test, subjects: usize, salt: &str) -> SimulationReport {
    let mut counts = vec![0usize; test.variants.len()];
    let mut in_test = 0;
    for i in 0..subjects {
        let decision = decide(test, &format!("subject-{i}"), salt);
        if let Some(variant) = decision.variant
            && let Some(index) = test.variants.iter().position(|v| v.id == variant.id)
        {
            counts[index] += 1;
            in_test += 1;
        }
    }

    let variants = test
        .variants
        .iter()
        .zip(expected_shares(test))
        .zip(counts)
        .map(|((variant, expected), assigned)| VariantShare {
            variant_id: variant.id.clone(),
            expected,
            assigned,
            actual: if in_test == 0 {
                0.0
            } else {
                assigned as f64 / in_test as f64
            },
        })
        .collect();

    SimulationReport {
        test_id: test.id.clone(),
        salt: salt.to_string(),
        subjects,
        in_test,
        expected_in_test: buckets_below(test.traffic_allocation) / 100.0,
        variants,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

pub fn render_simulation(report: &SimulationReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }
    let entered = if report.subjects == 0 {
        0.0
    } else {
        report.in_test as f64 / report.subjects as f64
    };
    let mut out = format!(
        "test: {} ({} subjects, salt '{}')\nin test: {} ({:.2}%, expected {:.2}%)\n\n",
        report.test_id,
        report.subjects,
        report.salt,
        report.in_test,
        entered * 100.0,
        report.expected_in_test * 100.0,
    );
    out.push_str(&format!(
        "{:<24} {:>10} {:>10} {:>10}\n",
        "variant", "assigned", "actual", "expected"
    ));
    for v in &report.variants {
        out.push_str(&format!(
            "{:<24} {:>10} {:>9.2}% {:>9.2}%\n",
            v.variant_id,
            v.assigned,
            v.actual * 100.0,
            v.expected * 100.0
        ));
    }
    Ok(out)
}
