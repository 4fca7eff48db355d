//! Generation session: generate, render, repair until a video exists or the
//! attempt budget runs out.
//!
//! The loop is an explicit phase machine so the number of render and repair
//! calls is easy to reason about: one render per attempt, one repair between
//! consecutive attempts, never a repair after the last one.

use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;

use reel_core::{AttemptOutcome, AttemptRecord, Config, Quality, SessionReport};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::llm::LlmError;
use crate::renderer::{RenderDiagnostic, RenderError, RenderOutcome};

/// Source of candidate code.
pub trait CodeGenerator {
    /// Start a new conversation and return the first candidate.
    fn request_initial_code(
        &mut self,
        user_request: &str,
        context: Option<&str>,
    ) -> impl Future<Output = std::result::Result<String, LlmError>> + Send;

    /// Return a corrected candidate for `prior_code` given a diagnostic.
    fn request_fix(
        &mut self,
        prior_code: &str,
        diagnostic: &str,
    ) -> impl Future<Output = std::result::Result<String, LlmError>> + Send;
}

/// Executes a candidate and reports whether it produced a video.
pub trait SceneRenderer {
    fn render(
        &mut self,
        candidate: &str,
        cancel_token: CancellationToken,
    ) -> impl Future<Output = std::result::Result<RenderOutcome, RenderError>> + Send;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("initial code generation failed: {0}")]
    Generation(#[source] LlmError),

    #[error("repair request after attempt {attempt} failed: {source}")]
    Repair {
        attempt: u32,
        #[source]
        source: LlmError,
        last_candidate: String,
        last_diagnostic: String,
        /// Scratch file the last candidate was rendered from.
        scene_file: PathBuf,
    },

    #[error("render attempt {attempt} failed: {source}")]
    Render {
        attempt: u32,
        #[source]
        source: RenderError,
        candidate: String,
    },

    #[error("interrupted after {attempts} render attempt(s)")]
    Interrupted { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// How a session ended when no error occurred.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Rendered {
        artifact: PathBuf,
        scene_file: PathBuf,
        attempts: u32,
    },
    /// Every attempt failed; carries the last diagnostic and candidate.
    Exhausted {
        diagnostic: RenderDiagnostic,
        candidate: String,
        scene_file: PathBuf,
        attempts: u32,
    },
}

impl SessionOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Rendered { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Progress notifications for front ends.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    Generating,
    Rendering {
        attempt: u32,
        max_attempts: u32,
        candidate: &'a str,
    },
    RenderFailed {
        attempt: u32,
        diagnostic: &'a RenderDiagnostic,
    },
    Repairing {
        attempt: u32,
    },
    Rendered {
        attempt: u32,
        artifact: &'a std::path::Path,
    },
}

pub type Observer = Box<dyn FnMut(SessionEvent<'_>) + Send>;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of render attempts (at least 1).
    pub max_attempts: u32,
    /// Recorded in the session report.
    pub model: String,
    /// Recorded in the session report.
    pub quality: Quality,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            model: config.model.clone(),
            quality: config.quality,
        }
    }
}

enum Phase {
    Generating,
    Rendering { candidate: String },
    Repairing {
        candidate: String,
        diagnostic: RenderDiagnostic,
        scene_file: PathBuf,
    },
}

/// One generation session over a generator and a renderer.
pub struct Session<G, R> {
    generator: G,
    renderer: R,
    config: SessionConfig,
    cancel_token: CancellationToken,
    observer: Option<Observer>,
    report: SessionReport,
}

impl<G, R> std::fmt::Debug for Session<G, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("render_count", &self.report.render_count())
            .finish_non_exhaustive()
    }
}

impl<G: CodeGenerator, R: SceneRenderer> Session<G, R> {
    pub fn new(generator: G, renderer: R, config: SessionConfig) -> Self {
        let report = SessionReport::new("", &config.model, config.quality, config.max_attempts);
        Self {
            generator,
            renderer,
            config,
            cancel_token: CancellationToken::new(),
            observer: None,
            report,
        }
    }

    /// Abort the session when `cancel_token` fires.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl FnMut(SessionEvent<'_>) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Report of the most recent run, including failed and interrupted ones.
    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    fn notify(&mut self, event: SessionEvent<'_>) {
        if let Some(observer) = self.observer.as_mut() {
            observer(event);
        }
    }

    /// Run the generate-render-repair loop for `user_request`.
    pub async fn run(&mut self, user_request: &str, context: Option<&str>) -> Result<SessionOutcome> {
        self.report = SessionReport::new(
            user_request,
            &self.config.model,
            self.config.quality,
            self.config.max_attempts,
        );
        let result = self.run_phases(user_request, context).await;
        self.report.finish();

        match &result {
            Ok(outcome) => info!(attempts = outcome.attempts(), "session finished"),
            Err(err) => warn!(error = %err, "session aborted"),
        }
        result
    }

    async fn run_phases(&mut self, user_request: &str, context: Option<&str>) -> Result<SessionOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;
        let mut phase = Phase::Generating;

        loop {
            phase = match phase {
                Phase::Generating => {
                    self.notify(SessionEvent::Generating);
                    let result = tokio::select! {
                        result = self.generator.request_initial_code(user_request, context) => result,
                        () = self.cancel_token.cancelled() => {
                            return Err(SessionError::Interrupted { attempts: attempt });
                        }
                    };
                    let candidate = result.map_err(SessionError::Generation)?;
                    Phase::Rendering { candidate }
                }

                Phase::Rendering { candidate } => {
                    attempt += 1;
                    self.notify(SessionEvent::Rendering {
                        attempt,
                        max_attempts,
                        candidate: &candidate,
                    });
                    info!(attempt, max_attempts, "rendering candidate");

                    let started = Instant::now();
                    let outcome = match self
                        .renderer
                        .render(&candidate, self.cancel_token.clone())
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(RenderError::Cancelled) => {
                            return Err(SessionError::Interrupted { attempts: attempt });
                        }
                        Err(source) => {
                            return Err(SessionError::Render {
                                attempt,
                                source,
                                candidate,
                            });
                        }
                    };
                    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                    match outcome {
                        RenderOutcome::Rendered {
                            scratch_id,
                            artifact,
                            scene_file,
                        } => {
                            self.report.record(AttemptRecord {
                                attempt,
                                scratch_id,
                                scene_file: scene_file.clone(),
                                outcome: AttemptOutcome::Rendered,
                                artifact: Some(artifact.clone()),
                                diagnostic: None,
                                duration_ms,
                            });
                            self.notify(SessionEvent::Rendered {
                                attempt,
                                artifact: &artifact,
                            });
                            return Ok(SessionOutcome::Rendered {
                                artifact,
                                scene_file,
                                attempts: attempt,
                            });
                        }
                        RenderOutcome::Failed {
                            scratch_id,
                            diagnostic,
                            scene_file,
                        } => {
                            self.report.record(AttemptRecord {
                                attempt,
                                scratch_id,
                                scene_file: scene_file.clone(),
                                outcome: diagnostic.outcome(),
                                artifact: None,
                                diagnostic: Some(diagnostic.prompt_text()),
                                duration_ms,
                            });
                            self.notify(SessionEvent::RenderFailed {
                                attempt,
                                diagnostic: &diagnostic,
                            });
                            warn!(attempt, outcome = diagnostic.outcome().as_str(), "render attempt failed");

                            if attempt >= max_attempts {
                                return Ok(SessionOutcome::Exhausted {
                                    diagnostic,
                                    candidate,
                                    scene_file,
                                    attempts: attempt,
                                });
                            }
                            Phase::Repairing {
                                candidate,
                                diagnostic,
                                scene_file,
                            }
                        }
                    }
                }

                Phase::Repairing {
                    candidate,
                    diagnostic,
                    scene_file,
                } => {
                    self.notify(SessionEvent::Repairing { attempt });
                    let diagnostic_text = diagnostic.prompt_text();
                    let result = tokio::select! {
                        result = self.generator.request_fix(&candidate, &diagnostic_text) => result,
                        () = self.cancel_token.cancelled() => {
                            return Err(SessionError::Interrupted { attempts: attempt });
                        }
                    };
                    match result {
                        Ok(fixed) => Phase::Rendering { candidate: fixed },
                        Err(source) => {
                            return Err(SessionError::Repair {
                                attempt,
                                source,
                                last_candidate: candidate,
                                last_diagnostic: diagnostic_text,
                                scene_file,
                            });
                        }
                    }
                }
            };
        }
    }
}
