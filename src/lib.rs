//! # Cogno
//!
//! Turns encyclopedia articles into structured lessons and a grounded tutor.
//!
//! A learner searches Wikipedia or Wikibooks, picks a page and some of its
//! sections, and gets a lesson (introduction, core concepts, formulas, a
//! worked example, active-recall prompts) synthesized from exactly those
//! sections. A streaming tutor then answers questions grounded in the same
//! text, and review reminders can be exported as an iCalendar file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  MediaWiki   │──▶│ fetch +      │──▶│ lesson       │
//! │  search/parse│   │ extract text │   │ synthesis    │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ snippets
//!                    ┌──────────────┐   ┌──────▼───────┐
//!                    │ observers    │◀──│   Session    │──▶ tutor (SSE)
//!                    │ (CLI, study) │   │ orchestrator │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cogno search "standard deviation"
//! cogno sections 27590
//! cogno lesson 27590 --title "Standard deviation" --sections 1,2
//! cogno study "bayes theorem"
//! cogno calendar "Standard deviation" --output reviews.ics
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Per-stage error types |
//! | [`traits`] | Collaborator traits (content, generation, chat) |
//! | [`connector_mediawiki`] | Wikipedia / Wikibooks API client |
//! | [`extract`] | Plain text from rendered section HTML |
//! | [`fetch`] | Concurrent, order-preserving section fetching |
//! | [`lesson`] | Schema-constrained lesson synthesis |
//! | [`tutor`] | Grounded, streamed tutor conversation |
//! | [`session`] | Orchestrator state machine |
//! | [`observer`] | Status reporting hooks |
//! | [`generation`] | Gemini / OpenAI providers |
//! | [`calendar`] | Spaced-repetition ICS export |
//! | [`render`] | Lesson text and JSON output |
//! | [`cli`] | One-shot commands |
//! | [`study`] | Interactive study loop |

pub mod calendar;
pub mod cli;
pub mod config;
pub mod connector_mediawiki;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod generation;
pub mod lesson;
pub mod models;
pub mod observer;
pub mod render;
pub mod session;
pub mod study;
pub mod traits;
pub mod tutor;
