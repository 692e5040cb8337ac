use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deckwright_core::{
    GenerationError, GenerationEvent, GenerationStream, SectionContext, SectionGenerator,
};
use futures::stream;
use serde_json::{json, Value};

/// Pre-programmed behaviour for one section.
#[derive(Clone, Debug)]
pub enum SectionScript {
    /// Yield `progress_steps` progress events then complete; `delay` is spread
    /// evenly across the steps. `payload` defaults to a summary of the context.
    Succeed {
        delay: Duration,
        progress_steps: u32,
        payload: Option<Value>,
    },
    /// Yield a terminal `Failed` after `delay`.
    Fail {
        delay: Duration,
        error: GenerationError,
    },
    /// `generate` itself returns the error.
    Reject(GenerationError),
    /// Never yields.
    Hang,
    /// Ends after `delay` without a terminal event.
    EndWithoutTerminal { delay: Duration },
    /// Panics while being polled, after `delay`.
    Panic { delay: Duration },
}

impl SectionScript {
    pub fn succeed(delay: Duration) -> Self {
        Self::Succeed {
            delay,
            progress_steps: 0,
            payload: None,
        }
    }

    pub fn succeed_with(delay: Duration, payload: Value) -> Self {
        Self::Succeed {
            delay,
            progress_steps: 0,
            payload: Some(payload),
        }
    }

    pub fn with_progress(delay: Duration, progress_steps: u32) -> Self {
        Self::Succeed {
            delay,
            progress_steps,
            payload: None,
        }
    }

    pub fn fail(error: GenerationError) -> Self {
        Self::Fail {
            delay: Duration::ZERO,
            error,
        }
    }

    pub fn fail_after(delay: Duration, error: GenerationError) -> Self {
        Self::Fail { delay, error }
    }
}

enum Step {
    Emit(GenerationEvent),
    Hang,
    Panic(usize),
}

/// Decrements the live counter when the generator stream is dropped.
struct LiveGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let _ = self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Playback {
    steps: VecDeque<(Duration, Step)>,
    _live: LiveGuard,
}

/// Deterministic generator with per-index scripts.
///
/// Tracks how many streams are alive at once so tests can check the
/// concurrency cap; used by the CLI demo as a stand-in content source.
pub struct ScriptedGenerator {
    default: SectionScript,
    scripts: HashMap<usize, SectionScript>,
    calls: AtomicUsize,
    live: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(default: SectionScript) -> Self {
        Self {
            default,
            scripts: HashMap::new(),
            calls: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_script(mut self, index: usize, script: SectionScript) -> Self {
        let _ = self.scripts.insert(index, script);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn script_for(&self, index: usize) -> &SectionScript {
        self.scripts.get(&index).unwrap_or(&self.default)
    }

    fn enter(&self) -> LiveGuard {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.peak.fetch_max(now, Ordering::SeqCst);
        LiveGuard {
            live: Arc::clone(&self.live),
        }
    }
}

fn default_payload(context: &SectionContext) -> Value {
    json!({
        "index": context.index,
        "title": context.title,
        "body": format!("{} ({} of {})", context.title, context.index + 1, context.total_sections),
    })
}

fn plan(script: &SectionScript, context: &SectionContext) -> VecDeque<(Duration, Step)> {
    let mut steps = VecDeque::new();
    match script {
        SectionScript::Succeed {
            delay,
            progress_steps,
            payload,
        } => {
            let step_delay = *delay / (progress_steps + 1);
            for step in 1..=*progress_steps {
                steps.push_back((
                    step_delay,
                    Step::Emit(GenerationEvent::Progress {
                        payload: json!({"step": step, "of": progress_steps}),
                    }),
                ));
            }
            let payload = payload.clone().unwrap_or_else(|| default_payload(context));
            steps.push_back((step_delay, Step::Emit(GenerationEvent::Completed { payload })));
        }
        SectionScript::Fail { delay, error } => {
            steps.push_back((*delay, Step::Emit(GenerationEvent::Failed { error: error.clone() })));
        }
        SectionScript::Hang => steps.push_back((Duration::ZERO, Step::Hang)),
        SectionScript::EndWithoutTerminal { delay } => {
            steps.push_back((
                *delay,
                Step::Emit(GenerationEvent::Progress {
                    payload: json!({"step": 1}),
                }),
            ));
        }
        SectionScript::Panic { delay } => steps.push_back((*delay, Step::Panic(context.index))),
        SectionScript::Reject(_) => {}
    }
    steps
}

#[async_trait]
impl SectionGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, context: SectionContext) -> Result<GenerationStream, GenerationError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script_for(context.index);
        if let SectionScript::Reject(error) = script {
            return Err(error.clone());
        }

        let playback = Playback {
            steps: plan(script, &context),
            _live: self.enter(),
        };

        Ok(Box::pin(stream::unfold(playback, |mut playback| async move {
            let (delay, step) = playback.steps.pop_front()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Emit(event) => Some((event, playback)),
                Step::Hang => {
                    std::future::pending::<()>().await;
                    None
                }
                Step::Panic(index) => panic!("scripted panic in section {index}"),
            }
        })))
    }
}
