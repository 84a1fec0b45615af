//! Presence collector producing a gauge sample per online friend.

use async_trait::async_trait;
use prometheus_client::{
    collector::Collector,
    encoding::{
        DescriptorEncoder, EncodeLabelKey, EncodeLabelSet, EncodeLabelValue, EncodeMetric,
        LabelSetEncoder, LabelValueEncoder,
    },
    metrics::gauge::ConstGauge,
    registry::Registry,
};
use tokio::{runtime::Handle, sync::Mutex};
use vrchat_api::{Friend, Session};

use std::{
    fmt::{self, Write as _},
    slice,
    sync::Arc,
};

/// Source of contacts (friends) whose presence is reported.
#[async_trait]
pub trait ContactSource: fmt::Debug + Send + Sync + 'static {
    /// Fetches the current contact list.
    async fn fetch_contacts(&self) -> anyhow::Result<Vec<Friend>>;
}

#[async_trait]
impl ContactSource for Session {
    async fn fetch_contacts(&self) -> anyhow::Result<Vec<Friend>> {
        Ok(self.friends().await?)
    }
}

/// Static description of a metric: its name, help and label schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Full metric name.
    pub name: &'static str,
    /// Help text.
    pub help: &'static str,
    /// Label names in the order they are encoded.
    pub labels: &'static [&'static str],
}

/// Descriptor of the presence gauge.
pub static USER_ONLINE: MetricDescriptor = MetricDescriptor {
    name: "vrchat_user_online",
    help: "Whether the user is online.",
    labels: &["username", "location", "status", "status_desc"],
};

/// Value of every presence sample. Absent friends are not reported at all.
const PRESENCE_VALUE: i64 = 1;

/// Label values of a single presence sample, encoded under [`USER_ONLINE`] label names.
///
/// Values are kept raw; they are escaped only when encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresenceLabels {
    /// Display name of the friend.
    pub username: String,
    /// Location identifier.
    pub location: String,
    /// Presence status as reported by the API.
    pub status: String,
    /// Free-form status description.
    pub status_desc: String,
}

impl From<&Friend> for PresenceLabels {
    fn from(friend: &Friend) -> Self {
        Self {
            username: friend.display_name.clone(),
            location: friend.location.clone(),
            status: friend.status.as_str().to_owned(),
            status_desc: friend.status_description.clone(),
        }
    }
}

impl PresenceLabels {
    fn values(&self) -> [&str; 4] {
        [
            &self.username,
            &self.location,
            &self.status,
            &self.status_desc,
        ]
    }
}

impl EncodeLabelSet for PresenceLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> fmt::Result {
        for (&name, value) in USER_ONLINE.labels.iter().zip(self.values()) {
            let mut label_encoder = encoder.encode_label();
            let mut key_encoder = label_encoder.encode_label_key()?;
            EncodeLabelKey::encode(&name, &mut key_encoder)?;
            let mut value_encoder = key_encoder.encode_label_value()?;
            EscapedLabelValue(value).encode(&mut value_encoder)?;
            value_encoder.finish()?;
        }
        Ok(())
    }
}

/// Label value escaped per the text exposition format. `prometheus-client` writes label values
/// as is, so free-form text set by friends must be escaped before encoding.
#[derive(Debug)]
struct EscapedLabelValue<'a>(&'a str);

impl EncodeLabelValue for EscapedLabelValue<'_> {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> fmt::Result {
        for ch in self.0.chars() {
            match ch {
                '\\' => encoder.write_str(r"\\")?,
                '"' => encoder.write_str(r#"\""#)?,
                '\n' => encoder.write_str(r"\n")?,
                _ => encoder.write_char(ch)?,
            }
        }
        Ok(())
    }
}

/// Single presence sample produced by a collection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceSample {
    /// Descriptor of the metric this sample belongs to.
    pub descriptor: &'static MetricDescriptor,
    /// Sample value; always 1.
    pub value: i64,
    /// Label values.
    pub labels: PresenceLabels,
}

/// Collector reporting presence of contacts as the `vrchat_user_online` gauge.
///
/// Contacts are fetched anew on each collection pass (i.e., on each scrape or push);
/// nothing is cached between passes. If fetching fails, the pass yields no samples.
///
/// Collection blocks the calling thread on the provided runtime handle, so it must not be
/// called from within an async context. [`MetricsExporter`](crate::MetricsExporter) encodes
/// registries on a blocking thread for this reason.
pub struct PresenceCollector {
    source: Arc<dyn ContactSource>,
    descriptor: &'static MetricDescriptor,
    runtime: Handle,
    // Upstream client is not assumed to support concurrent fetches.
    fetch_guard: Mutex<()>,
}

impl fmt::Debug for PresenceCollector {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PresenceCollector")
            .field("source", &self.source)
            .field("descriptor", &self.descriptor.name)
            .finish_non_exhaustive()
    }
}

impl PresenceCollector {
    /// Creates a collector fetching contacts from `source` using the specified Tokio `runtime`.
    pub fn new(source: Arc<dyn ContactSource>, runtime: Handle) -> Self {
        Self {
            source,
            descriptor: &USER_ONLINE,
            runtime,
            fetch_guard: Mutex::new(()),
        }
    }

    /// Returns descriptors of all metrics reported by this collector. There is exactly one.
    pub fn describe(&self) -> &'static [MetricDescriptor] {
        slice::from_ref(self.descriptor)
    }

    /// Registers this collector in the provided `registry`.
    pub fn register(self, registry: &mut Registry) {
        for descriptor in self.describe() {
            tracing::info!(
                name = descriptor.name,
                labels = ?descriptor.labels,
                "Registering presence collector"
            );
        }
        registry.register_collector(Box::new(self));
    }

    /// Performs a collection pass: fetches contacts and produces a sample for each of them.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async context.
    pub fn collect(&self) -> Vec<PresenceSample> {
        let fetched = self.runtime.block_on(async {
            let _guard = self.fetch_guard.lock().await;
            self.source.fetch_contacts().await
        });

        let friends = match fetched {
            Ok(friends) => friends,
            Err(err) => {
                tracing::warn!(%err, "Failed to get friends; reporting no presence samples");
                return vec![];
            }
        };
        tracing::info!(count = friends.len(), "Collected {} users", friends.len());

        friends
            .iter()
            .map(|friend| PresenceSample {
                descriptor: self.descriptor,
                value: PRESENCE_VALUE,
                labels: friend.into(),
            })
            .collect()
    }
}

impl Collector for PresenceCollector {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), fmt::Error> {
        let samples = self.collect();

        let gauge_type = ConstGauge::new(PRESENCE_VALUE).metric_type();
        let mut metric_encoder = encoder.encode_descriptor(
            self.descriptor.name,
            self.descriptor.help,
            None,
            gauge_type,
        )?;
        for sample in &samples {
            let family_encoder = metric_encoder.encode_family(&sample.labels)?;
            ConstGauge::new(sample.value).encode(family_encoder)?;
        }
        Ok(())
    }
}
