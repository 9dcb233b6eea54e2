pub mod domain;
pub mod extractor;
pub mod importer;
pub mod orchestrator;
pub mod parser;
pub mod ports;
pub mod presets;
pub mod prompt;
pub mod settings;

pub use domain::{
    AttemptOutcome, AttemptRecord, BatchPayload, ChatMessage, ChatRole, ContentItem,
    GenerationMode, GenerationRequest, OutputFormat, ParsedQuestion, Preset, PresetFields,
    StoredFile,
};
pub use extractor::{ContentExtractor, ExtractionError};
pub use importer::QuestionImporter;
pub use orchestrator::{BatchError, BatchReport, GenerationOrchestrator, PipelinePorts};
pub use parser::{parse, ParseFailure};
pub use ports::{
    CaptioningService, ExtractionCache, GenerationError, GenerationProvider,
    GenerationRequestStore, MarkupImporter, PdfRasterizer, PortError, PortResult, PresetStore,
    ProgressSink, QuestionBank, QuestionCreator,
};
pub use prompt::PromptBuilder;
pub use settings::GenerationSettings;
