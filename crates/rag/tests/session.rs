use std::fs;
use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use secrecy::SecretString;
use tempfile::{tempdir, TempDir};
use underwrite_core::AssessError;
use underwrite_rag::{
    AssessConfig, AssessmentRequest, Decision, LlmProvider, RequestContext, Session,
    SessionState, Upload,
};

const GUIDELINES: &str = "Rule 1: Reject if foundation cracks exceed minor.\n";

fn pdf_bytes(pages: &[Option<&str>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids = Vec::new();
    for page in pages {
        let operations = match page {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 14.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
            None => vec![
                Operation::new("re", vec![72.into(), 72.into(), 400.into(), 600.into()]),
                Operation::new("f", vec![]),
            ],
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(Object::from(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn appraisal() -> Upload {
    Upload::new(
        "appraisal.pdf",
        pdf_bytes(&[Some("Roof: good condition."), Some("Foundation: minor cracks.")]),
    )
}

fn guidelines() -> Upload {
    Upload::new("guidelines.txt", GUIDELINES.as_bytes().to_vec())
}

fn local_context(scratch: &TempDir) -> RequestContext {
    let mut config = AssessConfig::default();
    config.generation.provider = LlmProvider::Local;
    RequestContext {
        config,
        credential: None,
        scratch_root: scratch.path().to_path_buf(),
    }
}

fn assert_scratch_empty(root: &Path) {
    let leftovers: Vec<_> = fs::read_dir(root).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch root not cleaned: {leftovers:?}");
}

#[test]
fn missing_credential_writes_nothing() {
    let scratch = tempdir().unwrap();
    let ctx = RequestContext {
        config: AssessConfig::default(),
        credential: None,
        scratch_root: scratch.path().to_path_buf(),
    };
    let mut session = Session::new(ctx);
    let err = session
        .run(AssessmentRequest {
            report: Some(appraisal()),
            guidelines: Some(guidelines()),
        })
        .unwrap_err();
    assert!(matches!(err, AssessError::MissingCredential(ref var) if var == "GROQ_API_KEY"));
    assert_eq!(
        session.transitions(),
        &[
            SessionState::Idle,
            SessionState::Validating,
            SessionState::Failed,
            SessionState::Idle
        ]
    );
    assert_scratch_empty(scratch.path());
}

#[test]
fn missing_guidelines_stops_before_processing() {
    let scratch = tempdir().unwrap();
    let mut session = Session::new(local_context(&scratch));
    let err = session
        .run(AssessmentRequest {
            report: Some(appraisal()),
            guidelines: None,
        })
        .unwrap_err();
    assert!(matches!(err, AssessError::MissingInput(_)));
    assert!(err.user_message().contains("guidelines"));
    assert!(!session.transitions().contains(&SessionState::Processing));
    assert_scratch_empty(scratch.path());
}

#[test]
fn missing_report_is_checked_before_guidelines() {
    let scratch = tempdir().unwrap();
    let mut session = Session::new(local_context(&scratch));
    let err = session.run(AssessmentRequest::default()).unwrap_err();
    assert!(err.user_message().contains("appraisal report"));
}

#[test]
fn image_only_report_is_empty_extraction() {
    let scratch = tempdir().unwrap();
    let mut session = Session::new(local_context(&scratch));
    let err = session
        .run(AssessmentRequest {
            report: Some(Upload::new("scan.pdf", pdf_bytes(&[None, None]))),
            guidelines: Some(guidelines()),
        })
        .unwrap_err();
    assert!(matches!(err, AssessError::EmptyExtraction(_)));
    assert_eq!(session.state(), SessionState::Idle);
    assert_scratch_empty(scratch.path());
}

#[test]
fn corrupt_report_is_unreadable() {
    let scratch = tempdir().unwrap();
    let mut session = Session::new(local_context(&scratch));
    let err = session
        .run(AssessmentRequest {
            report: Some(Upload::new("broken.pdf", b"%PDF-1.4\nnot a pdf".to_vec())),
            guidelines: Some(guidelines()),
        })
        .unwrap_err();
    assert_eq!(err.code(), "unreadable_document");
    assert_scratch_empty(scratch.path());
}

#[test]
fn happy_path_produces_decision_with_sources() {
    let scratch = tempdir().unwrap();
    let mut session = Session::new(local_context(&scratch));
    let result = session
        .run(AssessmentRequest {
            report: Some(appraisal()),
            guidelines: Some(guidelines()),
        })
        .unwrap();

    assert!(["APPROVE", "REJECT", "REVIEW REQUIRED"]
        .iter()
        .any(|label| result.narrative.contains(label)));
    assert_eq!(result.decision, Some(Decision::ReviewRequired));
    assert!(result.narrative.to_lowercase().contains("foundation"));
    assert!(!result.sources.is_empty());
    assert!(result.sources.len() <= 4);
    assert!(result
        .sources
        .iter()
        .all(|chunk| ["appraisal.pdf", "guidelines.txt"]
            .contains(&chunk.metadata.origin_file.as_str())));
    assert_eq!(
        session.transitions(),
        &[
            SessionState::Idle,
            SessionState::Validating,
            SessionState::Processing,
            SessionState::Done,
            SessionState::Idle
        ]
    );
    assert_scratch_empty(scratch.path());
}

#[test]
fn oversized_context_is_rejected() {
    let scratch = tempdir().unwrap();
    let mut ctx = local_context(&scratch);
    ctx.config.generation.max_context_chars = 40;
    let err = Session::new(ctx)
        .run(AssessmentRequest {
            report: Some(appraisal()),
            guidelines: Some(guidelines()),
        })
        .unwrap_err();
    assert!(matches!(err, AssessError::ContextTooLarge { limit: 40, .. }));
    assert_scratch_empty(scratch.path());
}

#[test]
fn unreachable_model_is_a_generation_error() {
    let scratch = tempdir().unwrap();
    let mut config = AssessConfig::default();
    config.generation.provider = LlmProvider::OpenAi;
    config.generation.base_url = Some("http://127.0.0.1:1/v1".to_string());
    config.generation.timeout_secs = 2;
    let ctx = RequestContext {
        config,
        credential: Some(SecretString::new("sk-test".to_string())),
        scratch_root: scratch.path().to_path_buf(),
    };
    let err = Session::new(ctx)
        .run(AssessmentRequest {
            report: Some(appraisal()),
            guidelines: Some(guidelines()),
        })
        .unwrap_err();
    assert_eq!(err.code(), "generation_service_error");
    assert_scratch_empty(scratch.path());
}

#[test]
fn sessions_can_be_rerun() {
    let scratch = tempdir().unwrap();
    let mut session = Session::new(local_context(&scratch));
    let first = session
        .run(AssessmentRequest {
            report: Some(appraisal()),
            guidelines: Some(guidelines()),
        })
        .unwrap();
    let second = session
        .run(AssessmentRequest {
            report: Some(appraisal()),
            guidelines: Some(guidelines()),
        })
        .unwrap();
    assert_eq!(first.narrative, second.narrative);
    assert_eq!(first.sources, second.sources);
}
