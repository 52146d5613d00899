use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use lexchat_core::protocol::RefineResponse;
use lexchat_core::{
    BackendStatus, ChatError, ChatRequest, ChatResponse, ChatResult, ChatSession, ConversationTurn,
    ExchangeObserver, ExchangeOutcome, ExchangePhase, ExchangeState, Mode, ResultItem,
    SearchResponse, SessionEvent, SessionOptions, Transport,
};

enum Reply {
    Stream(Vec<ChatResult<Vec<u8>>>),
    Live(mpsc::UnboundedReceiver<ChatResult<Vec<u8>>>),
    Buffered(SearchResponse),
    Fail(ChatError),
}

struct FakeTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
    refine: ChatResult<RefineResponse>,
    related: ChatResult<Vec<String>>,
    related_hangs: bool,
    status: ChatResult<BackendStatus>,
}

impl FakeTransport {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            refine: Err(ChatError::Auxiliary("refine disabled".into())),
            related: Ok(Vec::new()),
            related_hangs: false,
            status: Ok(BackendStatus {
                ai_available: true,
                indexed_docs: 42,
            }),
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn chat(&self, request: &ChatRequest) -> ChatResult<ChatResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected chat request");
        match reply {
            Reply::Stream(chunks) => Ok(ChatResponse::Streaming(stream::iter(chunks).boxed())),
            Reply::Live(rx) => Ok(ChatResponse::Streaming(
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|c| (c, rx)) })
                    .boxed(),
            )),
            Reply::Buffered(body) => Ok(ChatResponse::Buffered(body)),
            Reply::Fail(err) => Err(err),
        }
    }

    async fn refine(&self, _query: &str) -> ChatResult<RefineResponse> {
        self.refine.clone()
    }

    async fn related_questions(&self, _query: &str, _response: &str) -> ChatResult<Vec<String>> {
        if self.related_hangs {
            std::future::pending::<()>().await;
        }
        self.related.clone()
    }

    async fn status(&self) -> ChatResult<BackendStatus> {
        self.status.clone()
    }

    async fn article(&self, _number: &str) -> ChatResult<Option<ResultItem>> {
        Ok(None)
    }
}

#[derive(Default)]
struct Recorder {
    phases: Vec<ExchangePhase>,
    tokens: Vec<String>,
    refined: Option<(String, String)>,
    results: Option<(usize, bool)>,
}

impl ExchangeObserver for Recorder {
    fn on_state(&mut self, state: &ExchangeState) {
        self.phases.push(state.phase());
    }

    fn on_token(&mut self, delta: &str, _text: &str) {
        self.tokens.push(delta.to_string());
    }

    fn on_refined(&mut self, original: &str, refined: &str) {
        self.refined = Some((original.to_string(), refined.to_string()));
    }

    fn on_results(&mut self, items: &[ResultItem], degraded: bool) {
        self.results = Some((items.len(), degraded));
    }
}

fn lines(lines: &[&str]) -> Reply {
    Reply::Stream(lines.iter().map(|l| Ok(l.as_bytes().to_vec())).collect())
}

fn article_results() -> SearchResponse {
    serde_json::from_str(
        r#"{"results": [{"doc_type": "article", "article_number": "23", "legal_text": "..."}]}"#,
    )
    .unwrap()
}

fn options(mode: Mode) -> SessionOptions {
    SessionOptions {
        mode,
        ..SessionOptions::default()
    }
}

fn session(transport: &Arc<FakeTransport>, mode: Mode) -> ChatSession {
    ChatSession::new(transport.clone(), options(mode))
}

#[tokio::test]
async fn test_search_mode_settles_without_touching_history() {
    let transport = Arc::new(FakeTransport::new(vec![Reply::Buffered(article_results())]));
    let mut session = session(&transport, Mode::Search);
    let mut recorder = Recorder::default();

    let outcome = session.submit("第 23 條", &mut recorder).await;

    match outcome {
        ExchangeOutcome::Results { items, degraded } => {
            assert!(!degraded);
            assert_eq!(items[0].as_article().unwrap().article_number, "23");
        }
        other => panic!("expected results, got {:?}", other),
    }
    assert_eq!(
        recorder.phases,
        vec![ExchangePhase::Sending, ExchangePhase::Settled, ExchangePhase::Idle]
    );
    assert_eq!(recorder.results, Some((1, false)));
    assert!(session.history().is_empty());

    let request = &transport.requests()[0];
    assert_eq!(request.mode, Mode::Search);
    assert!(request.history.is_none());
}

#[tokio::test]
async fn test_ai_stream_accumulates_and_commits_pair() {
    let transport = Arc::new(FakeTransport::new(vec![lines(&[
        "data: {\"text\":\"A\"}\n",
        "data: {\"text\":\"B\"}\n",
    ])]));
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    let outcome = session.submit("董事的責任？", &mut recorder).await;

    assert_eq!(
        outcome,
        ExchangeOutcome::Answered {
            query: "董事的責任？".into(),
            text: "AB".into(),
        }
    );
    assert_eq!(recorder.tokens, vec!["A", "B"]);
    assert_eq!(
        recorder.phases,
        vec![
            ExchangePhase::Sending,
            ExchangePhase::Streaming,
            ExchangePhase::Settled,
            ExchangePhase::Idle,
        ]
    );
    assert_eq!(
        session.history().to_vec(),
        vec![ConversationTurn::user("董事的責任？"), ConversationTurn::assistant("AB")]
    );
    assert!(session.state().is_idle());
}

#[tokio::test]
async fn test_upstream_error_fails_without_history() {
    let transport = Arc::new(FakeTransport::new(vec![lines(&[
        "data: {\"error\":\"rate limited\"}\n",
        "data: {\"text\":\"ignored\"}\n",
    ])]));
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    let outcome = session.submit("q", &mut recorder).await;

    assert_eq!(outcome, ExchangeOutcome::Failed(ChatError::Upstream("rate limited".into())));
    assert!(recorder.tokens.is_empty());
    assert_eq!(
        recorder.phases,
        vec![
            ExchangePhase::Sending,
            ExchangePhase::Streaming,
            ExchangePhase::Failed,
            ExchangePhase::Idle,
        ]
    );
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_transport_error_fails_and_session_recovers() {
    let transport = Arc::new(FakeTransport::new(vec![
        Reply::Fail(ChatError::transport("connection refused")),
        lines(&["data: {\"text\":\"ok\"}\n"]),
    ]));
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    let outcome = session.submit("q1", &mut recorder).await;
    assert!(matches!(outcome, ExchangeOutcome::Failed(ChatError::Transport { .. })));
    assert_eq!(
        recorder.phases,
        vec![ExchangePhase::Sending, ExchangePhase::Failed, ExchangePhase::Idle]
    );
    assert!(session.history().is_empty());

    let outcome = session.submit("q2", &mut Recorder::default()).await;
    assert!(matches!(outcome, ExchangeOutcome::Answered { .. }));
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn test_read_error_mid_stream_discards_partial_answer() {
    let transport = Arc::new(FakeTransport::new(vec![Reply::Stream(vec![
        Ok(b"data: {\"text\":\"A\"}\n".to_vec()),
        Err(ChatError::transport("connection reset")),
    ])]));
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    let outcome = session.submit("q", &mut recorder).await;

    assert!(matches!(outcome, ExchangeOutcome::Failed(ChatError::Transport { .. })));
    assert_eq!(recorder.tokens, vec!["A"]);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_split_reads_and_corrupt_line() {
    let transport = Arc::new(FakeTransport::new(vec![lines(&[
        "data: {\"text\":\"公司",
        "\"}\n\ndata: {bad json}\n\nda",
        "ta: {\"text\":\"法\"}\n\ndata: [DONE]\n\n",
    ])]));
    let mut session = session(&transport, Mode::Ai);

    let outcome = session.submit("q", &mut Recorder::default()).await;

    assert_eq!(
        outcome,
        ExchangeOutcome::Answered {
            query: "q".into(),
            text: "公司法".into(),
        }
    );
}

#[tokio::test]
async fn test_refined_query_is_sent_and_recorded() {
    let mut fake = FakeTransport::new(vec![lines(&["data: {\"text\":\"answer\"}\n"])]);
    fake.refine = Ok(RefineResponse {
        success: true,
        refined: "董事違反忠實義務的責任為何？".into(),
    });
    let transport = Arc::new(fake);
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    session.submit("董事 責任", &mut recorder).await;

    assert_eq!(
        recorder.refined,
        Some(("董事 責任".into(), "董事違反忠實義務的責任為何？".into()))
    );
    assert_eq!(transport.requests()[0].message, "董事違反忠實義務的責任為何？");
    assert_eq!(
        session.history().turns().next().unwrap().content,
        "董事違反忠實義務的責任為何？"
    );
}

#[tokio::test]
async fn test_unsuccessful_refinement_keeps_original_query() {
    let mut fake = FakeTransport::new(vec![lines(&["data: {\"text\":\"answer\"}\n"])]);
    fake.refine = Ok(RefineResponse {
        success: false,
        refined: "something else".into(),
    });
    let transport = Arc::new(fake);
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    session.submit("第 8 條", &mut recorder).await;

    assert!(recorder.refined.is_none());
    assert_eq!(transport.requests()[0].message, "第 8 條");
}

#[tokio::test]
async fn test_related_questions_are_best_effort() {
    let mut fake = FakeTransport::new(vec![lines(&["data: {\"text\":\"one\"}\n"])]);
    fake.related = Ok(vec!["什麼是董事？".into()]);
    let transport = Arc::new(fake);
    let mut session = session(&transport, Mode::Ai);

    let outcome = session.submit("q1", &mut Recorder::default()).await;
    assert_eq!(
        outcome,
        ExchangeOutcome::Answered {
            query: "q1".into(),
            text: "one".into(),
        }
    );
    assert_eq!(session.related_questions("q1", "one").await, vec!["什麼是董事？"]);

    let mut fake = FakeTransport::new(vec![]);
    fake.related = Err(ChatError::Auxiliary("500".into()));
    let session = ChatSession::new(Arc::new(fake), options(Mode::Ai));
    assert!(session.related_questions("q2", "two").await.is_empty());

    let mut fake = FakeTransport::new(vec![]);
    fake.related = Ok(vec!["unused".into()]);
    let session = ChatSession::new(
        Arc::new(fake),
        SessionOptions {
            related_questions: false,
            ..options(Mode::Ai)
        },
    );
    assert!(session.related_questions("q3", "three").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_related_request_does_not_hold_the_session() {
    let mut fake = FakeTransport::new(vec![
        lines(&["data: {\"text\":\"one\"}\n"]),
        lines(&["data: {\"text\":\"two\"}\n"]),
    ]);
    fake.related_hangs = true;
    let transport = Arc::new(fake);
    let shared = Arc::new(tokio::sync::Mutex::new(session(&transport, Mode::Ai)));

    let (outcome, related) = {
        let mut session = shared.try_lock().unwrap();
        let outcome = session.submit("q1", &mut Recorder::default()).await;
        assert!(session.state().is_idle());
        let related = match &outcome {
            ExchangeOutcome::Answered { query, text } => session.related_questions(query, text),
            other => panic!("expected an answer, got {:?}", other),
        };
        (outcome, related)
    };
    assert!(matches!(outcome, ExchangeOutcome::Answered { .. }));

    // The session is free while the follow-up request is still pending.
    let pending = tokio::spawn(related);
    let mut session = shared.try_lock().expect("session released after the answer");
    let outcome = session.submit("q2", &mut Recorder::default()).await;
    assert!(matches!(outcome, ExchangeOutcome::Answered { .. }));
    drop(session);

    // A request that never answers gives up instead of hanging forever.
    assert!(pending.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dropped_submission_returns_session_to_idle() {
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(FakeTransport::new(vec![
        Reply::Live(chunk_rx),
        lines(&["data: {\"text\":\"second\"}\n"]),
    ]));
    let mut session = session(&transport, Mode::Ai);

    chunk_tx.send(Ok(b"data: {\"text\":\"par\"}\n".to_vec())).unwrap();
    let mut recorder = Recorder::default();
    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        session.submit("first", &mut recorder),
    )
    .await;
    assert!(cancelled.is_err(), "the live stream never ends");
    assert_eq!(recorder.tokens, vec!["par"]);

    assert!(session.state().is_idle());
    assert!(session.history().is_empty());

    let outcome = session.submit("again", &mut Recorder::default()).await;
    assert_eq!(
        outcome,
        ExchangeOutcome::Answered {
            query: "again".into(),
            text: "second".into(),
        }
    );
    assert_eq!(
        session.history().to_vec(),
        vec![ConversationTurn::user("again"), ConversationTurn::assistant("second")]
    );
    drop(chunk_tx);
}

#[tokio::test]
async fn test_ai_unavailable_forces_search_mode() {
    let mut fake = FakeTransport::new(vec![Reply::Buffered(article_results())]);
    fake.status = Ok(BackendStatus {
        ai_available: false,
        indexed_docs: 0,
    });
    let transport = Arc::new(fake);
    let mut session = session(&transport, Mode::Ai);

    session.initialize().await;

    assert_eq!(session.mode(), Mode::Search);
    assert!(!session.ai_usable());
    assert!(!session.set_mode(Mode::Ai));
    assert_eq!(session.mode(), Mode::Search);

    session.submit("董事", &mut Recorder::default()).await;
    assert_eq!(transport.requests()[0].mode, Mode::Search);
}

#[tokio::test]
async fn test_failed_status_check_keeps_configured_mode() {
    let mut fake = FakeTransport::new(vec![]);
    fake.status = Err(ChatError::transport("connection refused"));
    let transport = Arc::new(fake);
    let mut session = session(&transport, Mode::Ai);

    session.initialize().await;

    assert_eq!(session.mode(), Mode::Ai);
    assert!(session.ai_usable());
}

#[tokio::test]
async fn test_buffered_reply_in_ai_mode_is_a_degraded_fallback() {
    let transport = Arc::new(FakeTransport::new(vec![Reply::Buffered(article_results())]));
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    let outcome = session.submit("第 23 條", &mut recorder).await;

    assert!(matches!(outcome, ExchangeOutcome::Results { degraded: true, .. }));
    assert_eq!(recorder.results, Some((1, true)));
    assert_eq!(
        recorder.phases,
        vec![ExchangePhase::Sending, ExchangePhase::Settled, ExchangePhase::Idle]
    );
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_history_is_sent_as_context_and_capped() {
    let replies = (0..3)
        .map(|i| lines(&[format!("data: {{\"text\":\"a{}\"}}\n", i).as_str()]))
        .collect();
    let transport = Arc::new(FakeTransport::new(replies));
    let mut session = ChatSession::new(
        transport.clone(),
        SessionOptions {
            history_cap: 4,
            ..SessionOptions::default()
        },
    );

    for i in 0..3 {
        session.submit(&format!("q{}", i), &mut Recorder::default()).await;
    }

    let requests = transport.requests();
    assert_eq!(requests[0].history.as_ref().unwrap().len(), 0);
    assert_eq!(requests[1].history.as_ref().unwrap().len(), 2);
    assert_eq!(requests[2].history.as_ref().unwrap().len(), 4);

    let contents: Vec<String> = session.history().turns().map(|t| t.content.clone()).collect();
    assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
}

#[tokio::test]
async fn test_blank_query_is_ignored() {
    let transport = Arc::new(FakeTransport::new(vec![]));
    let mut session = session(&transport, Mode::Ai);
    let mut recorder = Recorder::default();

    assert_eq!(session.submit("   ", &mut recorder).await, ExchangeOutcome::Ignored);
    assert!(recorder.phases.is_empty());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_second_submission_while_streaming_is_dropped() {
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(FakeTransport::new(vec![Reply::Live(chunk_rx)]));
    let shared = Arc::new(tokio::sync::Mutex::new(session(&transport, Mode::Ai)));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let task = {
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut observer = event_tx;
            let mut session = shared.lock().await;
            session.submit("first", &mut observer).await
        })
    };

    // Wait until the first exchange is streaming.
    loop {
        match event_rx.recv().await {
            Some(SessionEvent::State(ExchangeState::Streaming(_))) => break,
            Some(_) => continue,
            None => panic!("exchange ended before streaming"),
        }
    }

    assert!(shared.try_lock().is_err(), "second submission must be dropped");

    chunk_tx.send(Ok(b"data: {\"text\":\"done\"}\n".to_vec())).unwrap();
    drop(chunk_tx);

    let outcome = task.await.unwrap();
    assert_eq!(
        outcome,
        ExchangeOutcome::Answered {
            query: "first".into(),
            text: "done".into(),
        }
    );

    let session = shared.lock().await;
    assert_eq!(session.history().len(), 2);
    assert_eq!(transport.requests().len(), 1);
}
