use crate::collectors::CollectorRegistry;
use clap::{Arg, ArgAction, Command};

/// Flag that disables every collector not explicitly enabled.
pub const DISABLE_DEFAULTS: &str = "collector.disable-defaults";

pub fn add_collectors_args(mut cmd: Command) -> Command {
    let registry = CollectorRegistry::with_builtin().unwrap_or_default();

    for registration in registry.registrations() {
        let name = registration.name();

        // Create flag names
        let enable_flag: &'static str = Box::leak(format!("collector.{name}").into_boxed_str());
        let disable_flag: &'static str =
            Box::leak(format!("no-collector.{name}").into_boxed_str());

        let default_indicator = if registration.default_enabled() {
            " [default: enabled]"
        } else {
            " [default: disabled]"
        };
        let enable_help: &'static str = Box::leak(
            format!("Enable the {name} collector{default_indicator}").into_boxed_str(),
        );
        let disable_help: &'static str =
            Box::leak(format!("Disable the {name} collector").into_boxed_str());

        cmd = cmd
            .arg(
                Arg::new(enable_flag)
                    .long(enable_flag)
                    .help(enable_help)
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new(disable_flag)
                    .long(disable_flag)
                    .help(disable_help)
                    .action(ArgAction::SetTrue)
                    .overrides_with(enable_flag),
            );
    }

    cmd.arg(
        Arg::new(DISABLE_DEFAULTS)
            .long(DISABLE_DEFAULTS)
            .help("Disable every collector that is not explicitly enabled")
            .action(ArgAction::SetTrue),
    )
}
