pub mod bootstrap;
pub mod calendar_events;
pub mod callback_router;
pub mod commands;
pub mod note_orchestrator;
pub mod pending;
