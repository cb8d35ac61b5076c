#![allow(dead_code)]

pub mod polling;

use shellpool::{LocalRegistry, MemoryTerminalFactory, SessionPool};
use std::sync::Arc;

/// Pool over in-memory terminals, with the factory for driving them
pub fn memory_pool(factory: MemoryTerminalFactory) -> (SessionPool, MemoryTerminalFactory) {
    let registry = LocalRegistry::new(factory.clone());
    (SessionPool::new(Arc::new(registry)), factory)
}

/// Answers `echo <text>` with `<text>`, `true` with nothing, and never
/// finishes anything else.
pub fn echo_factory() -> MemoryTerminalFactory {
    MemoryTerminalFactory::with_command_runner(|command| {
        if let Some(text) = command.strip_prefix("echo ") {
            Some(format!("{text}\r\n"))
        } else if command == "true" {
            Some(String::new())
        } else {
            None
        }
    })
}
