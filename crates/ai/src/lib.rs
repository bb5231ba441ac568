//! `jobscout-ai`
//!
//! **Responsibility:** turning a job description into a validated [`JobSummary`].
//!
//! This crate owns:
//! - The provider clients (`OllamaClient`, `GeminiClient`) behind [`LlmClient`]
//! - A cancellation-aware [`RetryPolicy`] for transport failures
//! - The single-flight [`ExtractionCoordinator`]: newest request wins, older
//!   requests are cancelled and their results discarded
//!
//! Raw model text is cached through `jobscout-storage`; parsing happens on
//! every read.
//!
//! [`JobSummary`]: jobscout_core::JobSummary

pub mod client;
pub mod error;
pub mod extraction;
pub mod gemini;
pub mod ollama;
pub mod prompt;
pub mod retry;

pub use client::{LlmClient, LlmProviderConfig, ResponseFormat};
pub use error::{ExtractionError, LlmError};
pub use extraction::{ExtractionCoordinator, ExtractionOutcome, ExtractionState};
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use prompt::{JOB_DESCRIPTION_PLACEHOLDER, JOB_SUMMARY_PROMPT, render_job_summary_prompt};
pub use retry::{RetryError, RetryPolicy, Retryable};
