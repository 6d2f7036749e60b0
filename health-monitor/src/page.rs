//! HTML status page

use serde_json::Value;
use std::time::Duration;
use telemetry_store::{ConnectionStatus, TelemetryRecord, KNOWN_FIELDS};
use tera::Tera;

const INDEX_TEMPLATE: &str = "index.html";

pub struct StatusPage {
    tera: Tera,
}

impl StatusPage {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template(INDEX_TEMPLATE, include_str!("../templates/index.html"))?;
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        record: &TelemetryRecord,
        status: ConnectionStatus,
        threshold: Duration,
    ) -> Result<String, tera::Error> {
        let mut context = tera::Context::new();
        for field in KNOWN_FIELDS {
            let value = record.get(field).cloned().unwrap_or_else(|| Value::from(0));
            context.insert(field, &value);
        }
        context.insert("connection_status", status.as_str());
        context.insert("liveness_threshold_secs", &threshold.as_secs());
        self.tera.render(INDEX_TEMPLATE, &context)
    }
}
