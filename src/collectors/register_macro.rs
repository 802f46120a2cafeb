macro_rules! register_collectors {
    (
        $(
            $module:ident => $collector_type:ident : $default:literal
        ),* $(,)?
    ) => {
        // Import all collector modules
        $(
            pub mod $module;
            pub use $module::$collector_type;
        )*

        /// Collector names in registration order, used for the CLI flags.
        pub const COLLECTOR_NAMES: &[&str] = &[
            $(stringify!($module),)*
        ];

        /// Registers every built-in collector with its default-enabled flag.
        ///
        /// # Errors
        ///
        /// Fails if a name is already registered.
        pub fn register_builtin(
            registry: &mut $crate::collectors::registry::CollectorRegistry,
        ) -> Result<(), $crate::collectors::registry::RegistryError> {
            $(
                registry.register(stringify!($module), $default, |config| {
                    let collector: std::sync::Arc<dyn $crate::collectors::Collector> =
                        std::sync::Arc::new($collector_type::new(config));
                    Ok(collector)
                })?;
            )*
            Ok(())
        }
    };
}
