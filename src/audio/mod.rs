pub mod crossfade;
pub mod deck;
pub mod player;
pub mod sim;

pub use crossfade::{CrossfadeState, DeckId, FadeRamp};
pub use deck::{Deck, DeckState, MediaDeck, MediaEvent};
pub use player::{AdvancePolicy, DualDeckPlayer, PlayerSettings};
pub use sim::{SimCatalog, SimulatedDeck};
