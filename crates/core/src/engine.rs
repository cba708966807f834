//! Top-level intent engine
//!
//! One turn runs: preprocess -> dialog hook -> recognizers + merge -> slot
//! filling. The engine owns only read-only configuration; conversation
//! state lives in the caller's `Context`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::RuleSet;
use crate::context::Context;
use crate::error::EngineError;
use crate::fsm::{ContinuationHook, DialogStateMachine};
use crate::recognizer::{KeywordRecognizer, OutageReportRecognizer, PatternRecognizer, Recognizer};
use crate::registry::{sanitise, RecognizerRegistry};
use crate::slots::{FallbackSlotFiller, SlotFiller, SlotPipeline};
use crate::text::TextPreprocessor;
use crate::types::IntentResult;

pub struct IntentEngine {
    rules: Arc<RuleSet>,
    registry: RecognizerRegistry,
    slots: SlotPipeline,
    hook: Option<Arc<dyn ContinuationHook>>,
    preprocessor: Option<Box<dyn TextPreprocessor>>,
    process_timeout: Option<Duration>,
}

impl IntentEngine {
    /// Load a config directory and build an engine with the built-in stages
    pub fn from_config_dir(dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let rules = RuleSet::load_dir(dir)?;
        Self::builder(Arc::new(rules)).build()
    }

    pub fn builder(rules: Arc<RuleSet>) -> EngineBuilder {
        EngineBuilder::new(rules)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Recognizer names in execution order
    pub fn recognizer_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    pub fn slot_filler_names(&self) -> Vec<&str> {
        self.slots.filler_names()
    }

    /// Classify one input and fill its slots. Never fails: every
    /// recognizer or filler problem degrades to a weaker result.
    pub fn process(&self, text: &str, context: &Context) -> IntentResult {
        let deadline = self.process_timeout.map(|t| Instant::now() + t);

        let text = match &self.preprocessor {
            Some(p) => p.preprocess(text, context),
            None => text.to_string(),
        };

        let resolved = self
            .hook
            .as_ref()
            .and_then(|hook| hook.resolve(&text, context).and_then(|r| sanitise(hook.name(), r)));
        let mut result = match resolved {
            Some(result) => {
                debug!(intent = %result.intent, "dialog hook short-circuited recognition");
                result
            }
            None => self.registry.recognize(&text, &Arc::new(context.clone()), deadline),
        };

        self.slots.fill(&text, &mut result, context);
        result
    }

    /// `process`, then record the turn (last intent, dialog state) in `context`
    pub fn process_turn(&self, text: &str, context: &mut Context) -> IntentResult {
        let result = self.process(text, context);
        match &self.hook {
            Some(hook) => hook.advance(context, &result),
            None if !result.is_unknown() => context.last_intent = Some(result.intent.clone()),
            None => {}
        }
        result
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an engine from a rule set plus any plugins.
///
/// The pattern and keyword recognizers are always registered; the outage
/// recognizer joins when `[recognizers.outage]` is configured and the
/// dialog hook when `[dialog]` is.
pub struct EngineBuilder {
    rules: Arc<RuleSet>,
    recognizers: Vec<Arc<dyn Recognizer>>,
    fillers: Vec<Arc<dyn SlotFiller>>,
    fallback: Option<Arc<dyn FallbackSlotFiller>>,
    hook: Option<Arc<dyn ContinuationHook>>,
    use_dialog: bool,
    preprocessor: Option<Box<dyn TextPreprocessor>>,
    recognizer_timeout: Duration,
    process_timeout: Option<Duration>,
    fallback_timeout: Duration,
}

impl EngineBuilder {
    fn new(rules: Arc<RuleSet>) -> Self {
        let settings = rules.engine();
        Self {
            recognizer_timeout: settings.recognizer_timeout(),
            process_timeout: settings.process_timeout(),
            fallback_timeout: settings.fallback_timeout(),
            rules,
            recognizers: Vec::new(),
            fillers: Vec::new(),
            fallback: None,
            hook: None,
            use_dialog: true,
            preprocessor: None,
        }
    }

    /// Register an extra recognizer; it is ordered by its own priority
    pub fn recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizers.push(recognizer);
        self
    }

    /// Register a slot filler, selectable with `Context::slot_filler`
    pub fn slot_filler(mut self, filler: Arc<dyn SlotFiller>) -> Self {
        self.fillers.push(filler);
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn FallbackSlotFiller>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Replace the configured dialog state machine with a custom hook
    pub fn continuation(mut self, hook: Arc<dyn ContinuationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn without_continuation(mut self) -> Self {
        self.hook = None;
        self.use_dialog = false;
        self
    }

    pub fn preprocessor(mut self, preprocessor: Box<dyn TextPreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn recognizer_timeout(mut self, timeout: Duration) -> Self {
        self.recognizer_timeout = timeout;
        self
    }

    pub fn process_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<IntentEngine, EngineError> {
        let rules = self.rules;
        let settings = rules.engine();

        let mut registry = RecognizerRegistry::new(self.recognizer_timeout, settings.high_confidence_threshold);
        registry.register(Arc::new(PatternRecognizer::new(Arc::clone(&rules))))?;
        registry.register(Arc::new(KeywordRecognizer::new(Arc::clone(&rules))))?;
        if let Some(outage) = OutageReportRecognizer::from_rules(&rules)? {
            registry.register(Arc::new(outage))?;
        }
        for recognizer in self.recognizers {
            registry.register(recognizer)?;
        }

        let mut slots = SlotPipeline::new(Arc::clone(&rules)).with_fallback_timeout(self.fallback_timeout);
        for filler in self.fillers {
            slots.register(filler)?;
        }
        if let Some(fallback) = self.fallback {
            slots.set_fallback(fallback);
        }

        let hook = match self.hook {
            Some(hook) => Some(hook),
            None if self.use_dialog => rules
                .dialog()
                .map(|dialog| Arc::new(DialogStateMachine::from_config(dialog)) as Arc<dyn ContinuationHook>),
            None => None,
        };

        info!(
            intents = rules.intents().len(),
            recognizers = ?registry.names(),
            fillers = ?slots.filler_names(),
            fallback = slots.fallback_name().unwrap_or("none"),
            dialog = hook.is_some(),
            "intent engine ready"
        );

        Ok(IntentEngine {
            rules,
            registry,
            slots,
            hook,
            preprocessor: self.preprocessor,
            process_timeout: self.process_timeout,
        })
    }
}
