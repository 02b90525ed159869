//! A Rust implementation of secret-shared multi-party computation (MPC) in
//! the style of [SPDZ](https://eprint.iacr.org/2011/535), with
//! preprocessing based on oblivious transfer as in
//! [MASCOT](https://eprint.iacr.org/2016/505).
//!
//! N ≥ 2 mutually distrusting parties jointly evaluate arithmetic circuits
//! over a prime field without revealing their private inputs. Secrets are
//! held as additive shares authenticated by information-theoretic MACs
//! under a global key that is itself additively shared, so no party (and no
//! coalition short of all of them) can open or tamper with a value alone.
//!
//! ## Features
//!
//! - Batched Beaver multiplications, dot products, and public openings
//!   through a register-based executor, one communication round per batch
//! - Self-replenishing preprocessing: authenticated multiplication triples,
//!   random bits, and per-owner input masks, manufactured from OT-extension
//!   correlations and checked by sacrificing
//! - Deferred MAC checking with an explicit flush, so optimistic openings
//!   stay cheap and tampering is still caught before outputs are used
//! - Passive and active adversary models behind one configuration switch
//!
//! ## Main Components
//!
//! * [`session`]: [`session::Config`] and the per-party [`session::Session`]
//!   wiring.
//! * [`processor`]: the [`processor::SubProcessor`] executing batched
//!   instructions against register banks.
//! * [`prep`]: the [`prep::Prep`] buffer manufacturing correlated
//!   randomness.
//! * [`maccheck`]: batched opening and the deferred MAC check.
//! * [`share`], [`field`]: authenticated shares and the field they live in.
//! * [`channel`]: communication abstractions for exchanging data between
//!   parties.
//! * [`baseot`]: the base OT seed material consumed at setup.
//!
//! ## Basic Usage
//!
//! Each participating party needs to:
//!
//! 1. Obtain a [`baseot::PartySetup`] bundle (from a base OT protocol, or
//!    [`baseot::deal_all`] where a trusted dealer is acceptable)
//! 2. Set up a [`channel::Channel`] to every other party
//! 3. Wire up a [`session::Session`] and a [`processor::SubProcessor`]
//! 4. Inject inputs, run batched instructions, open results
//! 5. Flush the MAC check before trusting anything that was opened
//!
//! For simulated environments (testing/development), [`session::simulate`]
//! runs all parties as tasks over in-memory channels.
//!
//! ## Example
//!
//! ```ignore
//! use polysum::{
//!     field::F61,
//!     processor::SubProcessor,
//!     session::{Config, Session},
//! };
//!
//! # async fn example(channel: impl polysum::channel::Channel) -> Result<(), polysum::error::Error> {
//! let setup = /* base OT bundle for this party */
//! let session = Session::<F61>::setup(&setup, &Config::default())?;
//! let mut proc = SubProcessor::new(session, 16, 16);
//!
//! // party 0 injects two secret inputs into registers 0 and 1
//! let my_inputs = vec![F61::from(3), F61::from(4)];
//! proc.input_batch(&channel, 0, &[0, 1], Some(&my_inputs)).await?;
//! // register 2 = register 0 · register 1
//! proc.multiply_batch(&channel, &[(2, 0, 1)]).await?;
//! // open the product into clear register 0
//! proc.public_open_batch(&channel, &[(0, 2)]).await?;
//! proc.session.check.flush(&channel).await?;
//! let product = proc.registers.clear(0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! In the active model every deviation that could affect correctness is
//! caught by a consistency check, a sacrifice, or the MAC check, and
//! surfaces as an abort; what a party learns is limited to what follows
//! from its own inputs and the opened outputs. In the passive model the
//! same data flow runs without tags or checks and is only safe against
//! honest-but-curious peers.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod baseot;
pub mod channel;
pub mod error;
pub mod field;
pub mod maccheck;
pub mod prep;
pub mod processor;
pub mod session;
pub mod share;

mod aes_rng;
mod block;
mod cointoss;
mod cot;
mod transpose;
mod vole;

pub use block::Block;
