//! Prometheus exporter for the presence of VRChat friends.
//!
//! On each collection pass, the exporter fetches online friends of the logged-in user and reports
//! a `vrchat_user_online` gauge with value 1 for each of them, labelled with the friend's
//! display name, location, status and status description. Friends that are not online
//! are not reported at all.
//!
//! Metrics can be delivered in one of two mutually exclusive ways:
//!
//! - Served over HTTP at `/metrics` for Prometheus to scrape ([`MetricsExporter::start()`]).
//! - Pushed to a Prometheus push gateway at a fixed interval
//!   ([`MetricsExporter::push_to_gateway()`]). The first failed push stops the exporter.
//!
//! # Examples
//!
//! ```no_run
//! use prometheus_client::registry::Registry;
//! use tokio::runtime::Handle;
//! use vrchat_api::{Client, Credentials};
//! use vrchat_exporter::{MetricsExporter, PresenceCollector};
//!
//! use std::sync::Arc;
//!
//! # async fn test() -> anyhow::Result<()> {
//! let client = Client::new(vrchat_api::DEFAULT_API_URL.parse()?)?;
//! let session = client.authenticate(&Credentials::new("user", "password")).await?;
//!
//! let mut registry = Registry::default();
//! PresenceCollector::new(Arc::new(session), Handle::current()).register(&mut registry);
//! MetricsExporter::new(Arc::new(registry))
//!     .start("0.0.0.0:8080".parse()?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    collector::{
        ContactSource, MetricDescriptor, PresenceCollector, PresenceLabels, PresenceSample,
        USER_ONLINE,
    },
    config::{Config, RunMode},
    exporter::{
        BasicAuth, MetricsExporter, MetricsServer, PushError, PushGateway, JOB_NAME, METRICS_PATH,
        OPEN_METRICS_CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE,
    },
};

mod collector;
mod config;
mod exporter;
