//! Turn orchestration.
//!
//! `ChatOrchestrator::handle_turn` runs one conversational turn end to end:
//! first-turn retrieval, streaming from the resolved backend, and the tool
//! loop until the model stops asking for tools.

mod orchestrator;
mod settings;


pub use orchestrator::{ChatOrchestrator, TurnContext, TurnEvent, TurnOutcome, TurnState};
pub use settings::{TurnSettings, GENERATION_PARAMS_KEY, MAX_TOOL_ROUNDS_KEY};
