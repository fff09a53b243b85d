//! Boundary to the sandboxed script runtime.

/// Failure reported by a script engine. Carries the engine's own message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("script does not define function {0}")]
    MissingFunction(String),
    #[error("script failed: {0}")]
    Runtime(String),
    #[error("script exceeded its execution budget")]
    Timeout,
}

/// Evaluates one function of a customization script.
///
/// Implementations own sandboxing and time bounds. Arguments and results are JSON values;
/// exactly `nresults` values must come back on success.
pub trait ScriptEngine: Send + Sync {
    fn call(
        &self,
        script: &str,
        function: &str,
        args: &[serde_json::Value],
        nresults: usize,
    ) -> Result<Vec<serde_json::Value>, ScriptError>;
}
