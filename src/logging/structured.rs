use tracing::{debug, error, info, trace, warn};

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "evse", "valve", "runtime")
    pub component: String,
    /// Endpoint the component is bound to
    pub endpoint: Option<u16>,
    /// Additional context fields
    pub extra_fields: std::collections::BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            endpoint: None,
            extra_fields: std::collections::BTreeMap::new(),
        }
    }

    /// Set endpoint
    pub fn with_endpoint(mut self, endpoint: u16) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Add extra field
    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Structured logger with context
#[derive(Clone)]
pub struct StructuredLogger {
    pub(crate) context: LogContext,
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &LogContext {
        &self.context
    }

    /// Log an info message with context
    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }
    /// Log a warning message with context
    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }
    /// Log an error message with context
    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }
    /// Log a debug message with context
    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }
    /// Log a trace message with context
    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];
        if let Some(endpoint) = self.context.endpoint {
            fields.push(format!("endpoint={}", endpoint));
        }
        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }
        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

/// Create a logger with full context
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}
