use crate::game_type::GameType;

/// Placeholder root for titles whose root layout is not modelled.
///
/// Every lookup comes back empty; files stay reachable by content or
/// encoding key and through the install manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyRootHandler {
    pub game: GameType,
}

impl DummyRootHandler {
    pub fn new(game: GameType) -> Self {
        Self { game }
    }
}
