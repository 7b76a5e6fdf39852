use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use assess_core::model::{
    AnswerOption, Block, BlockId, BlockPayload, CandidateEmail, MediaRef, ModuleKind, OptionId,
    Question, QuestionId, Recording, SubmissionResult, TestContent, TestDescriptor, TestId,
    VerticalId,
};

use crate::config::ApiConfig;
use crate::error::{ApiError, ContentError, SubmissionError};

//
// ─── TRAITS ────────────────────────────────────────────────────────────────────
//

/// Read side of the assessment API: test catalog and test detail.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Ordered list of tests available for a vertical. May be empty.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` on transport or decoding failures.
    async fn list_tests(
        &self,
        kind: ModuleKind,
        vertical: VerticalId,
    ) -> Result<Vec<TestDescriptor>, ContentError>;

    /// Full detail for one test.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` on transport or decoding failures.
    async fn fetch_test(&self, kind: ModuleKind, id: TestId) -> Result<TestContent, ContentError>;
}

/// Module answers in wire form.
#[derive(Debug, Clone)]
pub enum SubmissionPayload {
    /// Selected option per question (Listening/Reading).
    Answers(BTreeMap<QuestionId, OptionId>),
    /// The concatenated free text (Writing).
    Essay(String),
    /// One finalized clip per block (Speaking).
    Recordings(Vec<Recording>),
}

/// Write side of the assessment API: grading submissions.
#[async_trait]
pub trait GradingApi: Send + Sync {
    /// Sends a module's collected answers for grading. Exactly one request
    /// per invocation; the caller decides whether to retry.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError` on transport failures or an out-of-range
    /// score in the response.
    async fn submit(
        &self,
        kind: ModuleKind,
        test: TestId,
        email: &CandidateEmail,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResult, SubmissionError>;
}

//
// ─── HTTP CLIENT ───────────────────────────────────────────────────────────────
//

/// reqwest-backed client for the per-module endpoint family.
#[derive(Clone)]
pub struct HttpAssessmentClient {
    client: Client,
    config: ApiConfig,
}

impl HttpAssessmentClient {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn tests_url(&self, kind: ModuleKind) -> String {
        format!("{}/api/{}/tests/", self.config.trimmed_base(), kind)
    }

    fn test_url(&self, kind: ModuleKind, id: TestId) -> String {
        format!("{}/api/{}/tests/{}/", self.config.trimmed_base(), kind, id)
    }

    fn submit_url(&self, kind: ModuleKind, id: TestId) -> String {
        format!(
            "{}/api/{}/tests/{}/submit_answers/",
            self.config.trimmed_base(),
            kind,
            id
        )
    }
}

#[async_trait]
impl ContentApi for HttpAssessmentClient {
    async fn list_tests(
        &self,
        kind: ModuleKind,
        vertical: VerticalId,
    ) -> Result<Vec<TestDescriptor>, ContentError> {
        let response = self
            .client
            .get(self.tests_url(kind))
            .query(&[("vertical", vertical.value())])
            .send()
            .await
            .map_err(ApiError::from)?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()).into());
        }

        let body: Vec<TestDescriptorDto> = response.json().await.map_err(ApiError::from)?;
        Ok(body.into_iter().map(TestDescriptorDto::into_descriptor).collect())
    }

    async fn fetch_test(&self, kind: ModuleKind, id: TestId) -> Result<TestContent, ContentError> {
        let response = self
            .client
            .get(self.test_url(kind, id))
            .send()
            .await
            .map_err(ApiError::from)?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()).into());
        }

        let body: TestDetailDto = response.json().await.map_err(ApiError::from)?;
        Ok(body.into_content(kind)?)
    }
}

#[async_trait]
impl GradingApi for HttpAssessmentClient {
    async fn submit(
        &self,
        kind: ModuleKind,
        test: TestId,
        email: &CandidateEmail,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResult, SubmissionError> {
        let request = self.client.post(self.submit_url(kind, test));

        let request = match payload {
            SubmissionPayload::Answers(answers) => {
                let answers: serde_json::Map<String, JsonValue> = answers
                    .iter()
                    .map(|(q, o)| (q.to_string(), JsonValue::from(o.value())))
                    .collect();
                request.json(&serde_json::json!({
                    "user_email": email.as_str(),
                    "answers": answers,
                }))
            }
            SubmissionPayload::Essay(text) => request.json(&serde_json::json!({
                "user_email": email.as_str(),
                "texto": text,
            })),
            SubmissionPayload::Recordings(recordings) => {
                let mut form =
                    reqwest::multipart::Form::new().text("user_email", email.as_str().to_owned());
                for recording in recordings {
                    let part = reqwest::multipart::Part::bytes(recording.wav().to_vec())
                        .file_name(recording.file_name())
                        .mime_str("audio/wav")
                        .map_err(ApiError::from)?;
                    form = form.part("audio", part);
                }
                request.multipart(form)
            }
        };

        let response = request.send().await.map_err(ApiError::from)?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()).into());
        }

        let body: SubmitResponseDto = response.json().await.map_err(ApiError::from)?;
        body.into_result()
    }
}

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
struct TestDescriptorDto {
    id: u64,
    #[serde(default)]
    title: String,
}

impl TestDescriptorDto {
    fn into_descriptor(self) -> TestDescriptor {
        TestDescriptor {
            id: TestId::new(self.id),
            title: self.title,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TestDetailDto {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    blocks: Vec<QuestionBlockDto>,
    #[serde(default)]
    speaking_blocks: Vec<PromptBlockDto>,
    #[serde(default)]
    writing_blocks: Vec<PromptBlockDto>,
}

#[derive(Debug, Deserialize)]
struct QuestionBlockDto {
    id: u64,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    video_file: Option<String>,
    #[serde(default)]
    questions: Vec<QuestionDto>,
}

#[derive(Debug, Deserialize)]
struct QuestionDto {
    id: u64,
    question_text: String,
    #[serde(default)]
    options: Vec<OptionDto>,
}

#[derive(Debug, Deserialize)]
struct OptionDto {
    id: u64,
    option_text: String,
}

#[derive(Debug, Deserialize)]
struct PromptBlockDto {
    id: u64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    example: Option<String>,
}

impl TestDetailDto {
    fn into_content(self, kind: ModuleKind) -> Result<TestContent, ApiError> {
        let blocks = match kind {
            ModuleKind::Listening | ModuleKind::Reading => self
                .blocks
                .into_iter()
                .map(QuestionBlockDto::into_block)
                .collect::<Result<Vec<_>, _>>()?,
            ModuleKind::Speaking => {
                self.speaking_blocks.into_iter().map(PromptBlockDto::into_block).collect()
            }
            ModuleKind::Writing => {
                self.writing_blocks.into_iter().map(PromptBlockDto::into_block).collect()
            }
        };

        Ok(TestContent {
            id: TestId::new(self.id),
            title: self.title,
            description: self.description,
            blocks,
        })
    }
}

impl QuestionBlockDto {
    fn into_block(self) -> Result<Block, ApiError> {
        let media = self
            .video_file
            .as_deref()
            .map(MediaRef::parse)
            .transpose()
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(Block {
            id: BlockId::new(self.id),
            payload: BlockPayload::Questions {
                instructions: self.instructions,
                media,
                questions: self
                    .questions
                    .into_iter()
                    .map(|q| Question {
                        id: QuestionId::new(q.id),
                        text: q.question_text,
                        options: q
                            .options
                            .into_iter()
                            .map(|o| AnswerOption {
                                id: OptionId::new(o.id),
                                text: o.option_text,
                            })
                            .collect(),
                    })
                    .collect(),
            },
        })
    }
}

impl PromptBlockDto {
    fn into_block(self) -> Block {
        Block {
            id: BlockId::new(self.id),
            payload: BlockPayload::Prompt {
                text: self.text,
                instruction: self.instruction,
                example: self.example,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponseDto {
    score: f64,
    #[serde(default)]
    report: Option<JsonValue>,
    #[serde(default)]
    cefr_level: Option<String>,
    #[serde(default)]
    criterios: Option<JsonValue>,
    #[serde(default)]
    feedback: Option<String>,
}

impl SubmitResponseDto {
    fn into_result(self) -> Result<SubmissionResult, SubmissionError> {
        let feedback_report = self
            .feedback
            .filter(|text| !text.is_empty())
            .or_else(|| self.report.map(|v| v.to_string()))
            .or_else(|| self.criterios.map(|v| v.to_string()));

        Ok(SubmissionResult::new(self.score, feedback_report, self.cefr_level)?)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
