use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use common::{error::AppError, utils::generation::TextGenerator};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    answer_retrieval::{
        create_classification_prompt, create_grounded_pension_prompt, create_insurance_prompt,
        create_ungrounded_pension_prompt, format_customer_context, with_disclaimer,
        GENERAL_DISCLAIMER, PENSION_DISCLAIMER,
    },
    pipeline::{RetrievalOrchestrator, RetrievalOutcome},
};

pub const NO_PENSION_REPLY: &str = "Unfortunately, you do not have a pension account with us.";
pub const NO_INSURANCE_REPLY: &str = "Unfortunately, you do not have an insurance policy with us.";
pub const SMALL_TALK_REPLY: &str =
    "I'm happy to chat! I can help with pension or insurance questions anytime.";
pub const NO_PRODUCTS_GREETING: &str = "No active products found for your account.";

/// Topic of a user message, as decided by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Pensions,
    Insurance,
    None,
}

impl Domain {
    fn from_label(label: &str) -> Self {
        match label.trim().trim_matches(|c: char| c == '.' || c == '"' || c == '\'') {
            "Pensions" => Domain::Pensions,
            "Insurance" => Domain::Insurance,
            _ => Domain::None,
        }
    }
}

/// Ask the generation model which domain `message` belongs to.
///
/// Anything other than an exact label, including a failed call, is `None`.
pub async fn classify_domain(generator: &dyn TextGenerator, message: &str) -> Domain {
    match generator
        .generate(&create_classification_prompt(message))
        .await
    {
        Ok(label) => {
            let domain = Domain::from_label(&label);
            debug!(%label, ?domain, "message classified");
            domain
        }
        Err(err) => {
            warn!(error = %err, "classification failed; treating message as small talk");
            Domain::None
        }
    }
}

/// Products a customer holds, each with its attributes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pension: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub insurance: Option<BTreeMap<String, String>>,
}

impl CustomerProfile {
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|err| AppError::Config(format!("invalid customer profile: {err}")))
    }

    pub fn has_pension(&self) -> bool {
        self.pension.is_some()
    }

    pub fn has_insurance(&self) -> bool {
        self.insurance.is_some()
    }

    pub fn greeting(&self) -> String {
        let name = self.name.as_deref().unwrap_or(&self.id);
        match (self.has_pension(), self.has_insurance()) {
            (true, true) => {
                format!("Hi {name}, how can I help you with your insurance and pension queries?")
            }
            (true, false) => format!("Hi {name}, how can I help you with your pension queries?"),
            (false, true) => format!("Hi {name}, how can I help you with your insurance queries?"),
            (false, false) => NO_PRODUCTS_GREETING.to_string(),
        }
    }
}

/// Produces a reply for messages of one domain.
#[async_trait]
pub trait Responder: Send + Sync {
    fn domain(&self) -> Domain;

    async fn respond(&self, message: &str, profile: &CustomerProfile) -> Result<String, AppError>;
}

/// Pension answers grounded in retrieved reference chunks when retrieval succeeds.
pub struct PensionResponder {
    generator: Arc<dyn TextGenerator>,
    retrieval: Arc<RetrievalOrchestrator>,
}

impl PensionResponder {
    pub fn new(generator: Arc<dyn TextGenerator>, retrieval: Arc<RetrievalOrchestrator>) -> Self {
        Self {
            generator,
            retrieval,
        }
    }
}

#[async_trait]
impl Responder for PensionResponder {
    fn domain(&self) -> Domain {
        Domain::Pensions
    }

    #[instrument(skip_all, fields(customer_id = %profile.id))]
    async fn respond(&self, message: &str, profile: &CustomerProfile) -> Result<String, AppError> {
        let Some(pension) = profile.pension.as_ref() else {
            return Ok(NO_PENSION_REPLY.to_string());
        };
        let customer_context = format_customer_context(pension);

        let (prompt, disclaimer) = match self.retrieval.retrieve(message).await? {
            RetrievalOutcome::Done(chunks) => {
                debug!(chunk_count = chunks.len(), "grounding pension answer");
                (
                    create_grounded_pension_prompt(&customer_context, &chunks, message),
                    PENSION_DISCLAIMER,
                )
            }
            RetrievalOutcome::Failed { cause, detail } => {
                info!(%cause, %detail, "answering pension question without grounding");
                (
                    create_ungrounded_pension_prompt(&customer_context, message),
                    GENERAL_DISCLAIMER,
                )
            }
        };

        let reply = self.generator.generate(&prompt).await?;
        Ok(with_disclaimer(&reply, disclaimer))
    }
}

/// Insurance answers from the customer's policy data alone.
pub struct InsuranceResponder {
    generator: Arc<dyn TextGenerator>,
}

impl InsuranceResponder {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Responder for InsuranceResponder {
    fn domain(&self) -> Domain {
        Domain::Insurance
    }

    #[instrument(skip_all, fields(customer_id = %profile.id))]
    async fn respond(&self, message: &str, profile: &CustomerProfile) -> Result<String, AppError> {
        let Some(insurance) = profile.insurance.as_ref() else {
            return Ok(NO_INSURANCE_REPLY.to_string());
        };

        let prompt = create_insurance_prompt(&format_customer_context(insurance), message);
        let reply = self.generator.generate(&prompt).await?;
        Ok(with_disclaimer(&reply, GENERAL_DISCLAIMER))
    }
}

/// Routes each message to the responder for its classified domain.
pub struct ChatRouter {
    generator: Arc<dyn TextGenerator>,
    responders: Vec<Box<dyn Responder>>,
}

impl ChatRouter {
    pub fn new(generator: Arc<dyn TextGenerator>, responders: Vec<Box<dyn Responder>>) -> Self {
        Self {
            generator,
            responders,
        }
    }

    /// Router with the pension and insurance responders sharing one generator.
    pub fn with_default_responders(
        generator: Arc<dyn TextGenerator>,
        retrieval: Arc<RetrievalOrchestrator>,
    ) -> Self {
        let responders: Vec<Box<dyn Responder>> = vec![
            Box::new(PensionResponder::new(Arc::clone(&generator), retrieval)),
            Box::new(InsuranceResponder::new(Arc::clone(&generator))),
        ];
        Self::new(generator, responders)
    }

    #[instrument(skip_all, fields(customer_id = %profile.id))]
    pub async fn reply(&self, message: &str, profile: &CustomerProfile) -> Result<String, AppError> {
        let domain = classify_domain(self.generator.as_ref(), message).await;

        match self.responders.iter().find(|r| r.domain() == domain) {
            Some(responder) => responder.respond(message, profile).await,
            None => Ok(SMALL_TALK_REPLY.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use common::{
        storage::{
            chunk_store::{ChunkStore, RetrievedChunk},
            types::text_chunk::TextChunk,
        },
        utils::embedding::EmbeddingService,
    };
    use tokio::sync::Mutex;

    use super::*;
    use crate::pipeline::RetrievalConfig;

    /// Replays scripted replies and records every prompt it receives.
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String, AppError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String, AppError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        async fn prompts(&self) -> Vec<String> {
            self.prompts.lock().await.clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, AppError> {
            self.prompts.lock().await.push(prompt.to_string());
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(AppError::InternalError("no scripted reply".into())))
        }
    }

    struct FixedEmbeddings;

    #[async_trait]
    impl EmbeddingService for FixedEmbeddings {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Serves one fixed chunk, or fails every search when `available` is false.
    struct FixedStore {
        available: bool,
    }

    #[async_trait]
    impl ChunkStore for FixedStore {
        fn dimension(&self) -> usize {
            2
        }

        async fn upsert_source(
            &self,
            _source_id: &str,
            _fingerprint: &str,
            _chunks: Vec<TextChunk>,
        ) -> Result<(), AppError> {
            Ok(())
        }

        async fn source_fingerprint(&self, _source_id: &str) -> Result<Option<String>, AppError> {
            Ok(None)
        }

        async fn retrieve(
            &self,
            _query_embedding: &[f32],
            _k: usize,
        ) -> Result<Vec<RetrievedChunk>, AppError> {
            if !self.available {
                return Err(AppError::StoreUnavailable("connection refused".into()));
            }
            Ok(vec![RetrievedChunk {
                chunk: TextChunk::new(
                    "fca/ps25-22.pdf".into(),
                    0,
                    "The money purchase annual allowance is 10,000 GBP.".into(),
                    vec![1.0, 0.0],
                ),
                score: 1.0,
            }])
        }
    }

    fn retrieval(available: bool) -> Arc<RetrievalOrchestrator> {
        let config = RetrievalConfig {
            top_k: 5,
            request_timeout: Duration::from_secs(5),
            cache_capacity: 0,
        };
        Arc::new(
            RetrievalOrchestrator::new(
                Arc::new(FixedEmbeddings),
                Arc::new(FixedStore { available }),
                config,
            )
            .expect("orchestrator"),
        )
    }

    fn profile(pension: bool, insurance: bool) -> CustomerProfile {
        CustomerProfile {
            id: "C042".into(),
            name: Some("Ada Lovelace".into()),
            pension: pension
                .then(|| BTreeMap::from([("Scheme".to_string(), "Workplace DC".to_string())])),
            insurance: insurance
                .then(|| BTreeMap::from([("Policy".to_string(), "Home contents".to_string())])),
        }
    }

    #[tokio::test]
    async fn classifier_accepts_exact_labels_only() {
        let generator = ScriptedGenerator::new(vec![
            Ok("Pensions".into()),
            Ok(" Insurance.\n".into()),
            Ok("Probably pensions".into()),
            Err(AppError::TransientService("timeout".into())),
        ]);

        assert_eq!(classify_domain(generator.as_ref(), "q").await, Domain::Pensions);
        assert_eq!(classify_domain(generator.as_ref(), "q").await, Domain::Insurance);
        assert_eq!(classify_domain(generator.as_ref(), "q").await, Domain::None);
        assert_eq!(classify_domain(generator.as_ref(), "q").await, Domain::None);
    }

    #[tokio::test]
    async fn pension_reply_is_grounded_in_retrieved_chunks() {
        let generator = ScriptedGenerator::new(vec![
            Ok("Pensions".into()),
            Ok("You can contribute up to the allowance.".into()),
        ]);
        let router = ChatRouter::with_default_responders(generator.clone(), retrieval(true));

        let reply = router
            .reply("How much can I pay into my pension?", &profile(true, false))
            .await
            .expect("reply");

        assert!(reply.starts_with("You can contribute"));
        assert!(reply.ends_with(PENSION_DISCLAIMER));
        let prompts = generator.prompts().await;
        let answer_prompt = prompts.get(1).expect("answer prompt");
        assert!(answer_prompt.contains("money purchase annual allowance"));
        assert!(answer_prompt.contains("Scheme: Workplace DC"));
    }

    #[tokio::test]
    async fn pension_reply_falls_back_when_retrieval_fails() {
        let generator = ScriptedGenerator::new(vec![
            Ok("Pensions".into()),
            Ok("General pension guidance.".into()),
        ]);
        let router = ChatRouter::with_default_responders(generator.clone(), retrieval(false));

        let reply = router
            .reply("What is drawdown?", &profile(true, false))
            .await
            .expect("reply");

        assert!(reply.ends_with(GENERAL_DISCLAIMER));
        let prompts = generator.prompts().await;
        let answer_prompt = prompts.get(1).expect("answer prompt");
        assert!(!answer_prompt.contains("Reference Data"));
    }

    #[tokio::test]
    async fn missing_products_get_fixed_replies_without_generation() {
        let generator =
            ScriptedGenerator::new(vec![Ok("Pensions".into()), Ok("Insurance".into())]);
        let router = ChatRouter::with_default_responders(generator.clone(), retrieval(true));

        let pension = router
            .reply("pension question", &profile(false, true))
            .await
            .expect("reply");
        let insurance = router
            .reply("insurance question", &profile(true, false))
            .await
            .expect("reply");

        assert_eq!(pension, NO_PENSION_REPLY);
        assert_eq!(insurance, NO_INSURANCE_REPLY);
        assert_eq!(generator.prompts().await.len(), 2, "only classification calls");
    }

    #[tokio::test]
    async fn insurance_reply_is_ungrounded() {
        let generator = ScriptedGenerator::new(vec![
            Ok("Insurance".into()),
            Ok(format!("Your contents are covered.\n{GENERAL_DISCLAIMER}")),
        ]);
        let router = ChatRouter::with_default_responders(generator.clone(), retrieval(true));

        let reply = router
            .reply("Am I covered for theft?", &profile(false, true))
            .await
            .expect("reply");

        assert_eq!(reply.matches(GENERAL_DISCLAIMER).count(), 1);
        let prompts = generator.prompts().await;
        let answer_prompt = prompts.get(1).expect("answer prompt");
        assert!(answer_prompt.contains("Policy: Home contents"));
        assert!(!answer_prompt.contains("money purchase"));
    }

    #[tokio::test]
    async fn unclassified_messages_get_small_talk() {
        let generator = ScriptedGenerator::new(vec![Ok("None".into())]);
        let router = ChatRouter::with_default_responders(generator.clone(), retrieval(true));

        let reply = router
            .reply("Lovely weather today", &profile(true, true))
            .await
            .expect("reply");
        assert_eq!(reply, SMALL_TALK_REPLY);
    }

    #[tokio::test]
    async fn generation_failure_propagates() {
        let generator = ScriptedGenerator::new(vec![
            Ok("Insurance".into()),
            Err(AppError::TransientService("503".into())),
        ]);
        let router = ChatRouter::with_default_responders(generator.clone(), retrieval(true));

        let result = router.reply("Am I covered?", &profile(false, true)).await;
        assert!(matches!(result, Err(AppError::TransientService(_))));
    }

    #[test]
    fn profile_parses_from_json_and_greets() {
        let profile = CustomerProfile::from_json(
            r#"{"id": "C7", "name": "Grace", "pension": {"Scheme": "SIPP"}}"#,
        )
        .expect("profile");

        assert!(profile.has_pension());
        assert!(!profile.has_insurance());
        assert_eq!(
            profile.greeting(),
            "Hi Grace, how can I help you with your pension queries?"
        );
        assert!(matches!(
            CustomerProfile::from_json("{\"name\": 3}"),
            Err(AppError::Config(_))
        ));
    }
}
