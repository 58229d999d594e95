pub mod assets;
pub mod combine;
pub mod conflicts;
pub mod fallback;
pub mod mock;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod query;
pub mod summarize;
pub mod types;

pub mod prelude {
    pub use crate::assets::{AssetAnalysis, AssetAnalyzer, AssetBatchAnalysis, AssetRole};
    pub use crate::combine::{CombinedAnalysis, Combiner, SessionMode};
    pub use crate::pipeline::{
        ModelInfo, PipelineConfig, PipelineModels, PipelineOutput, UnifiedAnalyzer,
    };
    pub use crate::progress::{
        NoopPublisher, ProgressEvent, ProgressPublisher, RealtimeHub, Stage, channel_name,
    };
    pub use crate::query::{OutputType, QueryAnalysis, QueryAnalyzer};
    pub use crate::summarize::ComprehensiveAnalysis;
    pub use crate::types::{
        AnalysisOptions, AnalysisRequest, AssetInput, MediaType, QueryHints, RequestLimits,
    };
}
