//! Renders a scrape's sample set as the Prometheus text exposition.
//!
//! Collection is fully asynchronous and finishes (or hits its deadline)
//! before rendering starts, so the renderer needs no deadline of its own -
//! it just turns whatever samples made it into text.

use bmcmon_collector::SampleSet;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

pub fn exposition(samples: &SampleSet) -> String {
    let registry = Registry::new();
    let mut families: HashMap<&'static str, GaugeVec> = HashMap::new();

    for sample in samples.samples() {
        let vec = match families.entry(sample.family.name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let Ok(vec) = GaugeVec::new(
                    Opts::new(sample.family.name, sample.family.help),
                    sample.family.labels,
                ) else {
                    continue;
                };
                if registry.register(Box::new(vec.clone())).is_err() {
                    continue;
                }
                entry.insert(vec)
            }
        };
        let labels: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
        vec.with_label_values(&labels).set(sample.value);
    }

    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buf) {
        tracing::error!(error = %e, "failed to encode exposition");
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmcmon_collector::bmc_info::BMC_INFO;
    use bmcmon_collector::collector::UP;
    use bmcmon_collector::power_draw::POWER_DRAW;

    #[test]
    fn renders_families_with_and_without_labels() {
        let mut samples = SampleSet::new();
        samples.record(&UP, &[], 1.0);
        samples.record(&BMC_INFO, &["00010203-0405-0607-0809-0a0b0c0d0e0f", "1.23", "2.0"], 1.0);
        samples.record(&POWER_DRAW, &["1"], 150.0);
        samples.record(&POWER_DRAW, &["2"], 155.0);

        let body = exposition(&samples);
        assert!(body.contains("# TYPE bmc_up gauge"));
        assert!(body.contains("bmc_up 1"));
        assert!(body.contains("guid=\"00010203-0405-0607-0809-0a0b0c0d0e0f\""));
        assert!(body.contains("power_draw_watts{psu=\"1\"} 150"));
        assert!(body.contains("power_draw_watts{psu=\"2\"} 155"));
    }

    #[test]
    fn absent_families_produce_no_output() {
        let mut samples = SampleSet::new();
        samples.record(&UP, &[], 0.0);
        let body = exposition(&samples);
        assert!(body.contains("bmc_up 0"));
        assert!(!body.contains("bmc_info"));
        assert!(!body.contains("power_draw_watts"));
    }

    #[test]
    fn empty_sample_set_renders_empty() {
        assert_eq!(exposition(&SampleSet::new()), "");
    }
}
