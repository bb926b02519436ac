pub mod ai;
pub mod api;
pub mod config;
pub mod context;
pub mod explain;
pub mod ocr;
pub mod pipeline;
pub mod storage;
pub mod utils;
pub mod weakness;

pub use api::build_router;
pub use config::AppConfig;
pub use context::AppContext;
pub use utils::{QuizError, QuizResult};
