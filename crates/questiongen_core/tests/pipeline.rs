mod common;

use common::*;
use questiongen_core::{
    domain::{AttemptOutcome, ChatRole, ContentItem, ExistingQuestion, StoredFile},
    orchestrator::GENERIC_ERROR_MESSAGE,
    presets::MULTICHOICE_MARKUP_EXAMPLE,
    BatchPayload, GenerationError, GenerationMode, GenerationOrchestrator, GenerationSettings,
    OutputFormat, PresetFields,
};

fn payload(request_ids: Vec<uuid::Uuid>) -> BatchPayload {
    BatchPayload {
        request_ids,
        context_id: 5,
        send_existing_questions_as_context: false,
        course_items: Vec::new(),
    }
}

#[tokio::test]
async fn french_revolution_question_is_imported_on_the_first_attempt() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::always(Ok(MULTICHOICE_MARKUP_EXAMPLE.to_string())),
    );
    let id = harness
        .store
        .insert(request(11, "French Revolution", markup_preset()))
        .await;
    let progress = RecordingProgress::default();

    let orchestrator = GenerationOrchestrator::new(harness.ports(), GenerationSettings::default());
    let report = orchestrator.run(&payload(vec![id]), &progress).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert!(!report.aborted);

    let calls = harness.provider.calls.read().await;
    assert_eq!(calls.len(), 1);
    let messages = &calls[0];
    assert_eq!(messages.len(), 4);
    assert!(messages[0].content.starts_with(PRIMER));
    assert_eq!(messages[1].name.as_deref(), Some("example_user"));
    assert_eq!(messages[2].name.as_deref(), Some("example_assistant"));
    assert_eq!(messages[3].role, ChatRole::User);
    assert!(messages[3].content.contains("\"French Revolution\""));

    let imports = harness.importer.markup.read().await;
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].0, 11);

    let stored = harness.store.request(id).await;
    assert_eq!(stored.success, Some(true));
    assert_eq!(stored.tries, 1);
    assert_eq!(
        stored.llm_response.as_deref(),
        Some(MULTICHOICE_MARKUP_EXAMPLE)
    );

    let attempts = harness.store.attempts.read().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Imported);
    assert!(progress.errors().await.is_empty());
}

#[tokio::test]
async fn a_request_is_attempted_exactly_max_tries_times() {
    let harness = Harness::new(
        RecordingImporter::rejecting(),
        ScriptedProvider::always(Ok(MULTICHOICE_MARKUP_EXAMPLE.to_string())),
    );
    let id = harness
        .store
        .insert(request(11, "Photosynthesis", markup_preset()))
        .await;
    let progress = RecordingProgress::default();

    let settings = GenerationSettings::default().with_max_tries(4);
    let report = GenerationOrchestrator::new(harness.ports(), settings)
        .run(&payload(vec![id]), &progress)
        .await;

    assert_eq!(harness.provider.call_count().await, 4);
    assert_eq!(harness.importer.markup.read().await.len(), 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.attempts.len(), 4);
    assert!(report
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::NotImported));

    let stored = harness.store.request(id).await;
    assert_eq!(stored.success, Some(false));
    assert_eq!(stored.tries, 4);
    assert_eq!(
        progress.errors().await,
        vec!["1 of 1 questions could not be created.".to_string()]
    );
}

#[tokio::test]
async fn unparseable_responses_are_retried_until_one_imports() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::scripted(
            vec![
                Ok("Sorry, I cannot help with that.".to_string()),
                Ok("<quiz><question type=\"multichoice\">".to_string()),
            ],
            Ok(MULTICHOICE_MARKUP_EXAMPLE.to_string()),
        ),
    );
    let id = harness
        .store
        .insert(request(11, "Volcanoes", markup_preset()))
        .await;
    let progress = RecordingProgress::default();

    let report = GenerationOrchestrator::new(harness.ports(), GenerationSettings::default())
        .run(&payload(vec![id]), &progress)
        .await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(harness.provider.call_count().await, 3);
    // The two broken responses never reached the importer.
    assert_eq!(harness.importer.markup.read().await.len(), 1);
    assert_eq!(harness.store.request(id).await.tries, 3);
}

#[tokio::test]
async fn a_provider_error_stops_the_whole_batch() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::always(Err(GenerationError::Provider {
            code: 401,
            message: "Invalid API key.".to_string(),
            debug_info: Some("upstream said 401 for key sk-...".to_string()),
        })),
    );
    let mut ids = Vec::new();
    for topic in ["one", "two", "three"] {
        ids.push(
            harness
                .store
                .insert(request(11, topic, markup_preset()))
                .await,
        );
    }
    let progress = RecordingProgress::default();

    let report = GenerationOrchestrator::new(harness.ports(), GenerationSettings::default())
        .run(&payload(ids.clone()), &progress)
        .await;

    assert!(report.aborted);
    assert_eq!(harness.provider.call_count().await, 1);
    assert_eq!(harness.store.request(ids[0]).await.success, Some(false));
    for id in &ids[1..] {
        let untouched = harness.store.request(*id).await;
        assert_eq!(untouched.tries, 0);
        assert_eq!(untouched.success, None);
    }
    let errors = progress.errors().await;
    assert_eq!(errors, vec!["Invalid API key.".to_string()]);
    assert!(!errors[0].contains("sk-"));
}

#[tokio::test]
async fn partial_failures_are_reported_without_failing_the_successes() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::scripted(
            vec![
                Ok("not a question".to_string()),
                Ok("still not a question".to_string()),
            ],
            Ok(MULTICHOICE_MARKUP_EXAMPLE.to_string()),
        ),
    );
    let first = harness
        .store
        .insert(request(11, "first", markup_preset()))
        .await;
    let second = harness
        .store
        .insert(request(11, "second", markup_preset()))
        .await;
    let progress = RecordingProgress::default();

    let settings = GenerationSettings::default().with_max_tries(2);
    let report = GenerationOrchestrator::new(harness.ports(), settings)
        .run(&payload(vec![first, second]), &progress)
        .await;

    assert_eq!((report.succeeded, report.failed), (1, 1));
    assert_eq!(harness.store.request(first).await.success, Some(false));
    assert_eq!(harness.store.request(second).await.success, Some(true));

    let events = progress.events.read().await;
    assert!(events.contains(&ProgressEvent::Update(1, 2, "Generated 1 of 2 questions.".to_string())));
    assert!(events.contains(&ProgressEvent::Update(2, 2, "Generated 2 of 2 questions.".to_string())));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Error(
            "1 of 2 questions could not be created.".to_string()
        ))
    );
}

#[tokio::test]
async fn existing_questions_are_sent_right_before_the_topic() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::always(Ok(MULTICHOICE_MARKUP_EXAMPLE.to_string())),
    );
    harness.store.existing.write().await.insert(
        11,
        vec![ExistingQuestion {
            title: "Bastille".to_string(),
            question_text: "<p>When was the Bastille stormed?</p>".to_string(),
        }],
    );
    let with_existing = harness
        .store
        .insert(request(11, "French Revolution", markup_preset()))
        .await;
    let empty_category = harness
        .store
        .insert(request(12, "French Revolution", markup_preset()))
        .await;

    let mut batch = payload(vec![with_existing, empty_category]);
    batch.send_existing_questions_as_context = true;
    GenerationOrchestrator::new(harness.ports(), GenerationSettings::default())
        .run(&batch, &RecordingProgress::default())
        .await;

    let calls = harness.provider.calls.read().await;
    assert_eq!(calls[0].len(), 5);
    assert!(calls[0][3].content.contains("When was the Bastille stormed?"));
    assert_eq!(calls[0][4].role, ChatRole::User);
    assert_eq!(calls[1].len(), 4);
}

#[tokio::test]
async fn course_contents_replace_the_story_of_every_request() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::always(Ok(MULTICHOICE_MARKUP_EXAMPLE.to_string())),
    );
    let a = harness.store.insert(request(11, "", markup_preset())).await;
    let b = harness.store.insert(request(11, "", markup_preset())).await;

    let mut batch = payload(vec![a, b]);
    batch.course_items = vec![
        ContentItem::Page {
            id: 1,
            html: "<p>The Estates-General met in 1789.</p>".to_string(),
        },
        ContentItem::Resource {
            id: 2,
            file: StoredFile {
                file_name: "slide.png".to_string(),
                mime_type: "image/png".to_string(),
                content: vec![1, 2, 3],
            },
        },
    ];

    let report = GenerationOrchestrator::new(harness.ports(), GenerationSettings::default())
        .run(&batch, &RecordingProgress::default())
        .await;
    assert_eq!(report.succeeded, 2);

    for id in [a, b] {
        let stored = harness.store.request(id).await;
        assert_eq!(stored.story, "The Estates-General met in 1789.Caption 1.");
        assert_eq!(stored.mode, GenerationMode::CourseContents);
    }
    let calls = harness.provider.calls.read().await;
    assert!(calls[0][3]
        .content
        .starts_with("Create a question based on the following content"));
    assert_eq!(harness.captioner.calls.read().await.len(), 1);
}

#[tokio::test]
async fn empty_course_contents_end_the_batch() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::always(Ok(MULTICHOICE_MARKUP_EXAMPLE.to_string())),
    );
    let id = harness.store.insert(request(11, "", markup_preset())).await;
    let mut batch = payload(vec![id]);
    batch.course_items = vec![ContentItem::Unsupported {
        id: 1,
        kind: "quiz".to_string(),
    }];
    let progress = RecordingProgress::default();

    let report = GenerationOrchestrator::new(harness.ports(), GenerationSettings::default())
        .run(&batch, &progress)
        .await;

    assert!(report.aborted);
    assert_eq!(harness.provider.call_count().await, 0);
    assert_eq!(progress.errors().await.len(), 1);
    assert_ne!(progress.errors().await[0], GENERIC_ERROR_MESSAGE);
}

#[tokio::test]
async fn flat_tag_presets_create_a_single_question() {
    let harness = Harness::new(
        RecordingImporter::accepting(),
        ScriptedProvider::always(Ok(
            "::Capital::What is the capital of France? {=Paris ~Lyon ~Marseille ~Nice}"
                .to_string(),
        )),
    );
    let preset = PresetFields {
        format: OutputFormat::FlatTag,
        ..markup_preset()
    };
    let id = harness.store.insert(request(11, "France", preset)).await;

    let report = GenerationOrchestrator::new(harness.ports(), GenerationSettings::default())
        .run(&payload(vec![id]), &RecordingProgress::default())
        .await;

    assert_eq!(report.succeeded, 1);
    let questions = harness.importer.questions.read().await;
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].name, "AI generated - Capital");
    assert_eq!(
        questions[0].answers.iter().filter(|a| a.is_correct()).count(),
        1
    );
    assert!(harness.importer.markup.read().await.is_empty());
}
