//! Settings injected into the orchestrator and the response importer.

/// Pipeline settings. Built once by the host and passed in at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    /// How many generation attempts a single request gets.
    pub max_tries: u32,
    /// Prepended to the name of imported questions. `None` disables it.
    pub identifier_prefix: Option<String>,
    /// Tag attached to imported questions. `None` disables it.
    pub identifier_tag: Option<String>,
    /// Upper bound on existing questions sent as context.
    pub existing_questions_limit: usize,
}

pub const DEFAULT_MAX_TRIES: u32 = 3;
pub const DEFAULT_IDENTIFIER_PREFIX: &str = "AI generated - ";
pub const DEFAULT_IDENTIFIER_TAG: &str = "aigenerated";
pub const DEFAULT_EXISTING_QUESTIONS_LIMIT: usize = 50;

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            identifier_prefix: Some(DEFAULT_IDENTIFIER_PREFIX.to_string()),
            identifier_tag: Some(DEFAULT_IDENTIFIER_TAG.to_string()),
            existing_questions_limit: DEFAULT_EXISTING_QUESTIONS_LIMIT,
        }
    }
}

impl GenerationSettings {
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn without_identifiers(mut self) -> Self {
        self.identifier_prefix = None;
        self.identifier_tag = None;
        self
    }
}
