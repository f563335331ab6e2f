/// One exported metric family: name, help string and label names. Every
/// family the exporter produces on `/bmc` is a gauge, so no type field is
/// carried. Families are declared as statics next to the subcollector that
/// emits them.
#[derive(Debug)]
pub struct Family {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

/// One metric sample emitted during a scrape.
#[derive(Debug)]
pub struct Sample {
    pub family: &'static Family,
    pub label_values: Vec<String>,
    pub value: f64,
}

/// The samples produced by one scrape, in emission order. Whatever has been
/// recorded when the deadline fires is rendered to the client; nothing is
/// cached across scrapes.
#[derive(Debug, Default)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, family: &'static Family, label_values: &[&str], value: f64) {
        debug_assert_eq!(family.labels.len(), label_values.len());
        self.samples.push(Sample {
            family,
            label_values: label_values.iter().map(|v| v.to_string()).collect(),
            value,
        });
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples of one family, in emission order.
    pub fn family_samples(&self, family: &Family) -> Vec<&Sample> {
        self.samples
            .iter()
            .filter(|s| s.family.name == family.name)
            .collect()
    }

    /// The value of the sample with the given family and exact label values,
    /// if one was emitted.
    pub fn value(&self, family: &Family, label_values: &[&str]) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| s.family.name == family.name && s.label_values == label_values)
            .map(|s| s.value)
    }
}

pub(crate) fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
