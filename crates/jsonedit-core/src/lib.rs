#![warn(missing_docs)]
//! jsonedit-core - Lazy Buffer & Structural Indexing Engine
//!
//! # Overview
//!
//! `jsonedit-core` is the storage and indexing kernel of a modal (Vim-style)
//! structural JSON editor. It represents documents from kilobytes to many
//! gigabytes without full in-memory materialization, keeps a structural
//! index fresh in the background so "what node is at this byte/line" answers
//! in sub-millisecond time, and persists edits crash-safely regardless of
//! file size. Command grammar, undo/redo, and rendering are upper layers
//! that consume this crate's surface.
//!
//! # Core Features
//!
//! - **Hybrid Storage**: small files live in a rope; large files are
//!   memory-mapped read-only with a sparse per-line edit overlay
//! - **Streaming Lexer**: restartable, chunked, malformed-input tolerant
//! - **Structural Index**: flat node arena with O(log) point queries and
//!   O(1) sibling/parent navigation
//! - **Bounded Line Cache**: strict LRU over decoded lines, loss-free by
//!   construction
//! - **Background Indexing**: message-driven worker, coalesced requests,
//!   atomic subtree installs
//! - **Crash-Safe Saves**: copy-on-write fast path, streaming fallback,
//!   atomic rename
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Document (editing + navigation surface)    │  ← Public API
//! ├─────────────────────────────────────────────┤
//! │  Save Pipeline (CoW / streaming, atomic)    │  ← Persistence
//! ├─────────────────────────────────────────────┤
//! │  Indexer (background worker, coalescing)    │  ← Coordination
//! ├─────────────────────────────────────────────┤
//! │  Structural Index (node arena, queries)     │  ← Structure
//! ├─────────────────────────────────────────────┤
//! │  Tokenizer (restartable streaming lexer)    │  ← Lexing
//! ├─────────────────────────────────────────────┤
//! │  Hybrid Buffer (rope | mmap + overlay)      │  ← Storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! Tokenize and index a value directly:
//!
//! ```rust
//! use jsonedit_core::{NodeKind, StructuralIndex, Tokenizer};
//!
//! let json = r#"{"a": 1, "b": [true, null]}"#;
//! let tokens = Tokenizer::new(json).tokenize_all();
//! let index = StructuralIndex::build(&tokens);
//!
//! let root = index.root().unwrap();
//! assert_eq!(index.get(root).unwrap().kind, NodeKind::Object);
//!
//! let id = index.node_at_offset(json.find("true").unwrap()).unwrap();
//! assert_eq!(index.get(id).unwrap().kind, NodeKind::Boolean);
//! ```
//!
//! Edit a document on disk:
//!
//! ```rust,no_run
//! use jsonedit_core::Document;
//!
//! let mut doc = Document::open("large.json")?;
//! doc.write(5, "    \"edited\": true,\n");
//! assert_eq!(doc.read_line(5), "    \"edited\": true,\n");
//!
//! let job = doc.save(None)?;
//! let report = doc.finish_save(job)?;
//! println!("saved via {:?}", report.strategy);
//! # Ok::<(), jsonedit_core::CoreError>(())
//! ```
//!
//! # Consistency Model
//!
//! `read_line` after `write` to the same line is synchronous: the overlay is
//! checked before base content, independent of the background indexer.
//! Structural queries are eventually consistent - they may observe a stale
//! index until the pending pass completes ([`Document::wait_for_indexing`]
//! is the fence). Malformed JSON is never an error: it degrades to
//! `Error`-kind nodes and best-effort containing ranges.
//!
//! # Module Description
//!
//! - [`buffer`] - hybrid storage (rope | mmap + overlay) and edit surface
//! - [`mmap`] - read-only mapping of the on-disk base file
//! - [`line_index`] - line-start offset table built at open time
//! - [`tokenizer`] - restartable streaming lexer
//! - [`index`] - structural node arena and queries
//! - [`cache`] - bounded LRU line cache
//! - [`indexer`] - background indexing coordinator
//! - [`save`] - copy-on-write / streaming save pipeline
//! - [`document`] - the tying-together facade

pub mod buffer;
pub mod cache;
pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod line_index;
pub mod mmap;
pub mod node;
pub mod save;
pub mod token;
pub mod tokenizer;

pub use buffer::{Buffer, CoreOptions, EditOutcome};
pub use cache::LineCache;
pub use document::Document;
pub use error::CoreError;
pub use index::StructuralIndex;
pub use indexer::Indexer;
pub use line_index::LineIndex;
pub use mmap::MappedFile;
pub use node::{Node, NodeId, NodeKind, NodeStatus};
pub use save::{SaveJob, SaveReport, SaveStrategy};
pub use token::{Token, TokenKind};
pub use tokenizer::{SliceRead, Tokenizer};
