//! Suite assembly from configured sources

use std::collections::BTreeMap;

use tracing::{debug, warn};

use benchmarkoor_config::SuiteSource;
use benchmarkoor_fixtures::{convert_with_ids, parse_fixture_file, Fixture, TestScript};

use crate::error::Result;
use crate::hash::suite_hash;
use crate::source::{discover_files, matches_filter, resolve_source, SourceDescriptor};

/// One materialized script plus the relative path it persists under.
#[derive(Debug, Clone)]
pub struct SuiteTest {
    pub path: String,
    pub script: TestScript,
}

/// A content-addressed group of test scripts.
#[derive(Debug, Clone)]
pub struct Suite {
    pub hash: String,
    pub tests: Vec<SuiteTest>,
    pub warmup: Vec<SuiteTest>,
    pub filter: Option<String>,
    pub sources: Vec<SourceDescriptor>,
}

impl Suite {
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.warmup.is_empty()
    }
}

/// Build a suite by walking every configured source.
///
/// Warmup sources convert first so request ids stay strictly increasing
/// in replay order across the whole suite. Fixture files that fail to
/// parse or fixtures that fail to convert are reported and skipped; the
/// build continues with the rest.
pub fn build(sources: &[SuiteSource], filter: Option<&str>) -> Result<Suite> {
    let mut descriptors = Vec::with_capacity(sources.len());
    let mut retained_files = Vec::new();
    let mut tests = Vec::new();
    let mut warmup = Vec::new();
    let mut next_id = 1u64;

    let (warmup_sources, test_sources): (Vec<_>, Vec<_>) =
        sources.iter().partition(|source| source.warmup);

    for source in warmup_sources.into_iter().chain(test_sources) {
        let resolved = resolve_source(source)?;
        descriptors.push(resolved.descriptor.clone());

        for relative in discover_files(&resolved.root)? {
            if !matches_filter(&relative, filter) {
                continue;
            }
            retained_files.push(relative.clone());

            let bytes = std::fs::read(resolved.root.join(&relative))?;
            let fixtures = match parse_fixture_file(&bytes) {
                Ok(fixtures) => fixtures,
                Err(error) => {
                    warn!(file = %relative, %error, "skipping unparseable fixture file");
                    continue;
                }
            };

            let scripts = convert_file(&relative, &fixtures, &mut next_id);
            if resolved.warmup {
                warmup.extend(scripts);
            } else {
                tests.extend(scripts);
            }
        }
    }

    let hash = suite_hash(&descriptors, &retained_files, filter);
    debug!(
        %hash,
        tests = tests.len(),
        warmup = warmup.len(),
        files = retained_files.len(),
        "suite built"
    );

    Ok(Suite {
        hash,
        tests,
        warmup,
        filter: filter.map(ToString::to_string),
        sources: descriptors,
    })
}

fn convert_file(
    relative: &str,
    fixtures: &BTreeMap<String, Fixture>,
    next_id: &mut u64,
) -> Vec<SuiteTest> {
    let stem = relative.strip_suffix(".json").unwrap_or(relative);
    let mut scripts = Vec::new();

    for (name, fixture) in fixtures {
        if !fixture.is_supported() {
            continue;
        }
        match convert_with_ids(name, fixture, next_id) {
            Ok(script) => scripts.push(SuiteTest {
                path: format!("{stem}/{}", sanitize(name)),
                script,
            }),
            Err(error) => {
                warn!(file = %relative, fixture = %name, %error, "rejecting fixture");
            }
        }
    }

    scripts
}

/// Restrict fixture names to filesystem-safe path segments.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
