//! # Taskbot Core
//!
//! Foundation types for the Taskbot dispatch engine.
//!
//! This crate holds everything that the engine and its external collaborators
//! agree on, without any dispatch logic:
//!
//! - **Events**: [`Event`], [`MessageEvent`], [`ActionEvent`], [`Sender`]
//! - **FSM storage**: [`FsmKey`], [`FsmRecord`], [`StateName`], [`FsmState`],
//!   the [`FsmStorage`] backend trait, [`MemoryStorage`] and [`FsmStore`]
//! - **Outbound API**: [`Bot`], [`Reply`], [`OutboxBot`]
//! - **Relational store**: [`UserStore`], [`ActivityStore`] and in-memory
//!   implementations
//! - **Translations**: [`Translator`], [`Translations`]
//! - **Transport**: [`UpdateSource`], [`Update`], [`Delivery`]
//!
//! ```text
//! ┌────────────┐  Update   ┌────────────┐  Context  ┌────────────┐
//! │ Transport  │──────────▶│ Dispatcher │──────────▶│  Handler   │
//! └────────────┘           └────────────┘           └────────────┘
//!                                │                     │     │
//!                                ▼                     ▼     ▼
//!                           FsmStore               UserStore  Bot
//! ```

pub mod bot;
pub mod error;
pub mod event;
pub mod fsm;
pub mod i18n;
pub mod store;
pub mod transport;

pub use bot::{Bot, BoxedBot, OutboxBot, Reply, SentMessage};
pub use error::{
    ApiError, ApiResult, FilterError, StorageError, StorageResult, StoreError, StoreResult,
    TransportError, TransportResult,
};
pub use event::{ActionEvent, ChatId, Event, MessageEvent, Sender, UserId};
pub use fsm::{
    BoxedStorage, FsmKey, FsmRecord, FsmState, FsmStorage, FsmStore, MemoryStorage, StateName,
};
pub use i18n::{BoxedTranslator, Translations, Translator};
pub use store::{
    ActivityStore, MemoryActivityStore, MemoryUserStore, NewUser, UserRecord, UserStore,
};
pub use transport::{Delivery, Update, UpdateSource};
