pub mod event;
pub mod order;
pub mod position;
pub mod token;

// Re-export commonly used types
pub use event::{ChainEvent, FactoryVersion, MintEvent, PairCreatedEvent};
pub use order::{LimitOrder, OrderStatus, OrderType};
pub use position::{PositionStatus, TokenPosition};
pub use token::{PriceSample, TokenMetadata};
