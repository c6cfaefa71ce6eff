pub mod db;
pub mod extraction;
pub mod format_detector;
pub mod quiz_llm;

pub use db::DbAdapter;
pub use extraction::LocalTextExtractor;
pub use format_detector::HeuristicFormatDetector;
pub use quiz_llm::OpenAiQuizAdapter;
