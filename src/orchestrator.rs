use crate::config::Config;
use crate::directive::{assemble_directive, AssembleParams, ReferenceImage};
use crate::errors::is_auth_error;
use crate::generation::{PromptGenerator, Sanitizer};
use crate::image::{ImageSynthesizer, SynthesisRequest};
use crate::manifest::generate_manifest;
use crate::reconcile::{parse_batch, reconcile};
use crate::session::Session;
use anyhow::{anyhow, Result};
use futures_util::stream::{self, StreamExt};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a run currently is. Surfaced for progress display and asserted on
/// after failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    RequestingPrompts,
    ReconcilingPrompts,
    SynthesizingMedia,
    RetryingFailures,
    Failed,
}

/// Aggregate accounting for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Prompts produced by this run (not the session lifetime total).
    pub generated: usize,
    /// Items kept as opaque text because they did not parse.
    pub unparsed: usize,
    /// Manifest slots the generator failed to fill across all batches.
    pub shortfall: usize,
    pub images_synthesized: usize,
    /// Images that succeeded only after a sanitize-and-retry pass.
    pub images_recovered: usize,
    /// Images still failing after their one retry.
    pub images_failed: usize,
    pub cancelled: bool,
}

/// Drives a session to its target: requests prompt batches chunk by chunk,
/// reconciles them, and optionally fans out media synthesis with one
/// sanitize-and-retry pass for refused prompts.
pub struct BatchOrchestrator {
    config: Config,
    generator: Box<dyn PromptGenerator>,
    sanitizer: Box<dyn Sanitizer>,
    synthesizer: Option<Box<dyn ImageSynthesizer>>,
    cancel: Arc<AtomicBool>,
    phase: Phase,
}

impl BatchOrchestrator {
    pub fn new(
        config: Config,
        generator: Box<dyn PromptGenerator>,
        sanitizer: Box<dyn Sanitizer>,
        synthesizer: Option<Box<dyn ImageSynthesizer>>,
    ) -> Self {
        Self {
            config,
            generator,
            sanitizer,
            synthesizer,
            cancel: Arc::new(AtomicBool::new(false)),
            phase: Phase::Idle,
        }
    }

    /// Handle for requesting a stop. Checked between batches, never mid-call,
    /// so a cancelled run always ends on a reconciled boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs until the session reaches its target or is cancelled.
    ///
    /// `subject_references` go to media synthesis; `product_images` ride
    /// along in the prompt directive for product batches.
    pub async fn run(
        &mut self,
        session: &mut Session,
        subject_references: &[ReferenceImage],
        product_images: &[ReferenceImage],
    ) -> Result<JobReport> {
        let mut report = JobReport::default();

        while session.remaining() > 0 {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Run cancelled with {} items remaining", session.remaining());
                report.cancelled = true;
                break;
            }

            let count = session.remaining().min(self.config.batch.chunk_size);
            let manifest = generate_manifest(
                session.state.task_type,
                session.state.target_total,
                session.state.generated_count,
                count,
            );
            let previous_settings = session.state.repetition.window(
                self.config.batch.repetition_window,
                self.config.batch.repetition_entry_chars,
            );
            let request = assemble_directive(&AssembleParams {
                task_type: session.state.task_type,
                manifest: &manifest,
                profile: &session.state.profile,
                wardrobe: session.state.wardrobe,
                aesthetic: session.state.aesthetic,
                product_images,
                previous_settings: &previous_settings,
                temperature: self.config.generation.temperature,
            });

            self.phase = Phase::RequestingPrompts;
            info!(
                "Requesting batch of {} ({}/{} done)",
                count, session.state.generated_count, session.state.target_total
            );
            let raw = match self.generator.generate(&request).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.phase = Phase::Failed;
                    return Err(e);
                }
            };

            self.phase = Phase::ReconcilingPrompts;
            let items = match parse_batch(&raw) {
                Ok(items) => items,
                Err(e) => {
                    self.phase = Phase::Failed;
                    return Err(e);
                }
            };
            if items.is_empty() {
                self.phase = Phase::Failed;
                return Err(anyhow!("Generation returned no usable items"));
            }

            let outcome = reconcile(&items, &manifest);
            if outcome.items.len() < manifest.len() {
                let missing = manifest.len() - outcome.items.len();
                warn!("Batch returned {} of {} items", outcome.items.len(), manifest.len());
                report.shortfall += missing;
            }
            report.generated += outcome.items.len();
            report.unparsed += outcome.unparsed;

            let batch_start = session.state.prompts.len();
            session.absorb(outcome);
            session.save_draft().await?;

            if self.synthesizer.is_some() {
                self.synthesize_batch(session, batch_start, subject_references, &mut report)
                    .await?;
                session.save_draft().await?;
            }
        }

        if !report.cancelled {
            info!(
                "Run complete: {} prompts, {} images, {} permanent image failures",
                report.generated, report.images_synthesized, report.images_failed
            );
        }
        self.phase = Phase::Idle;
        Ok(report)
    }

    /// Fans out synthesis for the items appended by the current batch, then
    /// gives refused prompts one sanitized retry.
    async fn synthesize_batch(
        &mut self,
        session: &mut Session,
        batch_start: usize,
        references: &[ReferenceImage],
        report: &mut JobReport,
    ) -> Result<()> {
        let synthesizer = match &self.synthesizer {
            Some(s) => s,
            None => return Ok(()),
        };

        self.phase = Phase::SynthesizingMedia;
        let prompts: Vec<(usize, String)> = session.state.prompts[batch_start..]
            .iter()
            .enumerate()
            .map(|(offset, item)| (batch_start + offset, item.compiled_string()))
            .collect();
        info!("Synthesizing {} images", prompts.len());

        let results: Vec<(usize, String, Result<crate::image::ImageOutput>)> =
            stream::iter(prompts)
                .map(|(index, prompt)| async move {
                    let result = synthesizer
                        .synthesize(&SynthesisRequest {
                            prompt: &prompt,
                            references,
                        })
                        .await;
                    (index, prompt, result)
                })
                .buffer_unordered(self.config.batch.chunk_size.max(1))
                .collect()
                .await;

        let mut failures = Vec::new();
        for (index, prompt, result) in results {
            match result {
                Ok(output) => {
                    session.state.prompts[index].image = Some(output.as_display_string());
                    report.images_synthesized += 1;
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    if is_auth_error(&message) {
                        self.phase = Phase::Failed;
                        return Err(e);
                    }
                    failures.push((index, prompt, message));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        self.phase = Phase::RetryingFailures;
        for (index, prompt, message) in failures {
            warn!("Image {} refused ({}), sanitizing and retrying", index, message);
            let retried = match self.sanitizer.sanitize(&prompt).await {
                Ok(sanitized) => {
                    synthesizer
                        .synthesize(&SynthesisRequest {
                            prompt: &sanitized,
                            references,
                        })
                        .await
                }
                Err(e) => Err(e),
            };
            match retried {
                Ok(output) => {
                    session.state.prompts[index].image = Some(output.as_display_string());
                    report.images_synthesized += 1;
                    report.images_recovered += 1;
                }
                Err(e) => {
                    error!("Image {} failed permanently: {:#}", index, e);
                    report.images_failed += 1;
                }
            }
        }
        Ok(())
    }
}
