pub mod run;

use crate::{collectors::CollectorRegistry, exporter::Settings};

#[derive(Debug)]
pub enum Action {
    Run {
        port: u16,
        listen: Option<String>,
        settings: Settings,
        registry: CollectorRegistry,
    },
}
