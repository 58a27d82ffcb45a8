//! Ownership labels stamped on every managed object
//!
//! Containers, volumes and networks created by the engine carry these
//! labels so orphans from crashed runs can be swept independently.

use std::collections::HashMap;

pub const MANAGED_LABEL: &str = "benchmarkoor.managed";
pub const RUN_ID_LABEL: &str = "benchmarkoor.run-id";
pub const INSTANCE_LABEL: &str = "benchmarkoor.instance";
pub const CLIENT_LABEL: &str = "benchmarkoor.client";

/// The label filter selecting everything this engine owns.
pub fn managed_filter() -> HashMap<String, Vec<String>> {
    HashMap::from([(
        "label".to_string(),
        vec![format!("{MANAGED_LABEL}=true")],
    )])
}

/// The full label set for an object owned by one run.
pub fn run_labels(run_id: &str, instance: &str, client: &str) -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (RUN_ID_LABEL.to_string(), run_id.to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (CLIENT_LABEL.to_string(), client.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_labels_identify_the_owner() {
        let labels = run_labels("a1b2c3d4", "geth-default", "geth");
        assert_eq!(labels[MANAGED_LABEL], "true");
        assert_eq!(labels[RUN_ID_LABEL], "a1b2c3d4");
        assert_eq!(labels[INSTANCE_LABEL], "geth-default");
        assert_eq!(labels[CLIENT_LABEL], "geth");
    }

    #[test]
    fn test_managed_filter_matches_label_key() {
        let filter = managed_filter();
        assert_eq!(filter["label"], vec!["benchmarkoor.managed=true".to_string()]);
    }
}
