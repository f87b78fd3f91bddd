// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;
use rstest::*;

use bolt_session::session::request::{
    DiscardParameters, HelloParameters, PullParameters, Request, RunParameters,
};
use bolt_session::session::spi::{
    AuthenticationResult, BoltStateMachineSpi, RecordBatch, StatementMetadata, TransactionHandle,
    TransactionKind, TransactionSpi,
};
use bolt_session::{
    status, value_map, BoltConnectionFatality, BoltError, BoltState, BoltStateMachine, Outcome,
    ResponseCallbacks, ResponseRecorder, SessionConfig, SessionHandle, SpiError, SpiResult,
    TerminationToken, TransactionParameters, Value,
};

const KILL_QUERY: &str = "CALL dbms.killMe()";

#[derive(Debug, Default)]
struct Journal {
    clients: Vec<String>,
    reported: Vec<BoltError>,
    terminated: Vec<String>,
    committed: Vec<TransactionHandle>,
    rolled_back: Vec<TransactionHandle>,
}

type SharedJournal = Arc<Mutex<Journal>>;

struct Server {
    journal: SharedJournal,
}

impl BoltStateMachineSpi for Server {
    fn authenticate(&mut self, auth: &HashMap<String, Value>) -> SpiResult<AuthenticationResult> {
        let principal = auth.get("principal").and_then(Value::as_str);
        let credentials = auth.get("credentials").and_then(Value::as_str);
        match (principal, credentials) {
            (Some(principal), Some("secret")) => Ok(AuthenticationResult::new(principal)),
            (Some(principal), Some("expired")) => {
                Ok(AuthenticationResult::new(principal).with_credentials_expired(true))
            }
            _ => Err(SpiError::Authentication {
                message: String::from("The client is unauthorized due to authentication failure."),
            }),
        }
    }

    fn register_client(&mut self, user_agent: &str) {
        self.journal.lock().clients.push(String::from(user_agent));
    }

    fn report_error(&mut self, error: &BoltError) {
        self.journal.lock().reported.push(error.clone());
    }

    fn on_terminate(&mut self, session_id: &str) {
        self.journal.lock().terminated.push(String::from(session_id));
    }
}

#[derive(Debug)]
struct EngineTransaction {
    token: TerminationToken,
    results: HashMap<i64, VecDeque<Vec<Value>>>,
    next_qid: i64,
    kill_on_fetch: bool,
}

/// Understands a handful of canned queries.
struct Engine {
    journal: SharedJournal,
    // stands in for an administrator killing the query while it's fetched
    killer: Arc<Mutex<Option<SessionHandle>>>,
    next_tx: u64,
    transactions: HashMap<TransactionHandle, EngineTransaction>,
}

impl Engine {
    fn transaction(&mut self, tx: TransactionHandle) -> SpiResult<&mut EngineTransaction> {
        self.transactions.get_mut(&tx).ok_or_else(|| {
            BoltError::new(status::GENERAL_UNKNOWN_ERROR, format!("unknown {:?}", tx)).into()
        })
    }
}

impl TransactionSpi for Engine {
    fn begin(
        &mut self,
        _kind: TransactionKind,
        parameters: &TransactionParameters,
        token: TerminationToken,
    ) -> SpiResult<TransactionHandle> {
        if parameters.db.as_deref() == Some("missing") {
            return Err(BoltError::new(
                "Neo.ClientError.Database.DatabaseNotFound",
                "Database does not exist.",
            )
            .into());
        }
        self.next_tx += 1;
        let handle = TransactionHandle(self.next_tx);
        self.transactions.insert(
            handle,
            EngineTransaction {
                token,
                results: HashMap::new(),
                next_qid: 0,
                kill_on_fetch: false,
            },
        );
        Ok(handle)
    }

    fn run(
        &mut self,
        tx: TransactionHandle,
        query: &str,
        parameters: &HashMap<String, Value>,
    ) -> SpiResult<StatementMetadata> {
        let tx = self.transaction(tx)?;
        let (fields, records) = match query {
            "RETURN $x AS x" => (
                vec!["x"],
                vec![vec![parameters.get("x").cloned().unwrap_or(Value::Null)]],
            ),
            "UNWIND range(1, $n) AS n RETURN n" => {
                let n = parameters.get("n").and_then(Value::as_int).unwrap_or(0);
                (vec!["n"], (1..=n).map(|i| vec![Value::from(i)]).collect())
            }
            KILL_QUERY => {
                tx.kill_on_fetch = true;
                (vec![], vec![])
            }
            _ => {
                return Err(BoltError::new(
                    status::STATEMENT_SYNTAX_ERROR,
                    format!("Invalid input '{}'", query),
                )
                .into())
            }
        };
        let qid = tx.next_qid;
        tx.next_qid += 1;
        tx.results.insert(qid, records.into());
        Ok(StatementMetadata {
            fields: fields.into_iter().map(String::from).collect(),
            query_id: qid,
        })
    }

    fn fetch(
        &mut self,
        tx: TransactionHandle,
        qid: i64,
        n: i64,
        discard: bool,
    ) -> SpiResult<RecordBatch> {
        let killer = Arc::clone(&self.killer);
        let tx = self.transaction(tx)?;
        if tx.kill_on_fetch {
            if let Some(handle) = killer.lock().as_ref() {
                handle.mark_for_termination();
            }
        }
        if tx.token.is_marked() {
            return Err(SpiError::Terminated);
        }
        let result = tx.results.entry(qid).or_default();
        let take = match n {
            -1 => result.len(),
            n => (n as usize).min(result.len()),
        };
        let records: Vec<_> = result.drain(..take).collect();
        let has_more = !result.is_empty();
        let mut metadata = HashMap::new();
        if !has_more {
            tx.results.remove(&qid);
            metadata.insert(String::from("type"), Value::from("r"));
        }
        Ok(RecordBatch {
            records: if discard { vec![] } else { records },
            has_more,
            metadata,
        })
    }

    fn commit(&mut self, tx: TransactionHandle) -> SpiResult<Option<String>> {
        self.transactions.remove(&tx);
        self.journal.lock().committed.push(tx);
        Ok(Some(format!("bookmark:{}", tx.0)))
    }

    fn rollback(&mut self, tx: TransactionHandle) -> SpiResult<()> {
        self.transactions.remove(&tx);
        self.journal.lock().rolled_back.push(tx);
        Ok(())
    }
}

struct Fixture {
    session: BoltStateMachine,
    journal: SharedJournal,
    killer: Arc<Mutex<Option<SessionHandle>>>,
}

impl Fixture {
    fn send(&mut self, request: Request) -> ResponseRecorder {
        let mut recorder = ResponseRecorder::new();
        self.session.process(request, &mut recorder).unwrap();
        assert_eq!(recorder.outcomes().len(), 1);
        recorder
    }
}

#[fixture]
fn connected() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let journal = SharedJournal::default();
    let killer = Arc::new(Mutex::new(None));
    let session = BoltStateMachine::new(
        SessionConfig::new()
            .with_server_agent(String::from("Neo4j/5.0.0"))
            .with_connection_id(String::from("bolt-42")),
        Box::new(Server {
            journal: Arc::clone(&journal),
        }),
        Box::new(Engine {
            journal: Arc::clone(&journal),
            killer: Arc::clone(&killer),
            next_tx: 0,
            transactions: HashMap::new(),
        }),
    );
    Fixture {
        session,
        journal,
        killer,
    }
}

#[fixture]
fn ready(connected: Fixture) -> Fixture {
    let mut fixture = connected;
    let recorder = fixture.send(hello("secret"));
    assert_eq!(recorder.outcome(), Some(&Outcome::Success));
    fixture
}

fn hello(credentials: &str) -> Request {
    Request::Hello(HelloParameters::new(
        "neo4j-python/5.0",
        value_map!({"scheme": "basic", "principal": "neo4j", "credentials": credentials}),
    ))
}

fn run(query: &str) -> Request {
    Request::Run(RunParameters::new(query))
}

fn unwind(n: i64) -> Request {
    Request::Run(
        RunParameters::new("UNWIND range(1, $n) AS n RETURN n")
            .with_parameters(value_map!({"n": n})),
    )
}

#[rstest]
fn test_hello(connected: Fixture) {
    let mut fixture = connected;

    let recorder = fixture.send(hello("secret"));

    assert_eq!(recorder.outcome(), Some(&Outcome::Success));
    assert_eq!(
        recorder.metadata().get("server"),
        Some(&Value::from("Neo4j/5.0.0"))
    );
    assert_eq!(
        recorder.metadata().get("connection_id"),
        Some(&Value::from("bolt-42"))
    );
    assert_eq!(fixture.session.owner(), Some("neo4j"));
    assert_eq!(fixture.journal.lock().clients, vec!["neo4j-python/5.0"]);
}

#[rstest]
fn test_hello_with_expired_credentials(connected: Fixture) {
    let mut fixture = connected;

    let recorder = fixture.send(hello("expired"));

    assert_eq!(
        recorder.metadata().get("credentials_expired"),
        Some(&Value::from(true))
    );
    assert_eq!(fixture.session.state(), BoltState::Ready);
}

#[rstest]
fn test_bad_credentials_close_the_session(connected: Fixture) {
    let mut fixture = connected;
    let mut recorder = ResponseRecorder::new();

    let res = fixture.session.process(hello("wrong"), &mut recorder);

    let Err(BoltConnectionFatality::Authentication { .. }) = res else {
        panic!("expected authentication fatality, got {:?}", res);
    };
    assert_eq!(
        recorder.failure().map(BoltError::code),
        Some(status::SECURITY_UNAUTHORIZED)
    );
    assert!(fixture.session.is_closed());
    let journal = fixture.journal.lock();
    assert_eq!(journal.terminated, vec!["bolt-42"]);
    assert_eq!(journal.reported.len(), 1);
    assert!(journal.clients.is_empty());
}

#[rstest]
fn test_auto_commit_query_streamed_in_batches(ready: Fixture) {
    let mut fixture = ready;

    let recorder = fixture.send(unwind(3));
    assert_eq!(recorder.metadata().get("fields"), Some(&Value::from(vec!["n"])));
    assert_eq!(fixture.session.state(), BoltState::AutoCommit);

    let recorder = fixture.send(Request::Pull(PullParameters::new(2, -1)));
    assert_eq!(
        recorder.records(),
        &[vec![Value::from(1)], vec![Value::from(2)]]
    );
    assert_eq!(recorder.metadata().get("has_more"), Some(&Value::from(true)));
    assert_eq!(fixture.session.state(), BoltState::AutoCommit);

    let recorder = fixture.send(Request::Pull(PullParameters::all()));
    assert_eq!(recorder.records(), &[vec![Value::from(3)]]);
    assert_eq!(
        recorder.metadata().get("bookmark"),
        Some(&Value::from("bookmark:1"))
    );
    assert_eq!(recorder.metadata().get("type"), Some(&Value::from("r")));
    assert!(recorder.metadata().contains_key("t_last"));
    assert_eq!(fixture.session.state(), BoltState::Ready);
    assert_eq!(fixture.journal.lock().committed, vec![TransactionHandle(1)]);
}

#[rstest]
fn test_explicit_transaction_with_two_results(ready: Fixture) {
    let mut fixture = ready;

    fixture.send(Request::Begin(TransactionParameters::new().with_db("neo4j")));
    assert_eq!(fixture.session.state(), BoltState::InTransaction);
    let first = fixture.send(unwind(2));
    let second = fixture.send(Request::Run(
        RunParameters::new("RETURN $x AS x").with_parameters(value_map!({"x": "hi"})),
    ));
    assert_eq!(first.metadata().get("qid"), Some(&Value::from(0)));
    assert_eq!(second.metadata().get("qid"), Some(&Value::from(1)));

    let recorder = fixture.send(Request::Pull(PullParameters::new(-1, 0)));
    assert_eq!(recorder.records().len(), 2);
    let recorder = fixture.send(Request::Discard(DiscardParameters::all()));
    assert!(recorder.records().is_empty());
    assert_eq!(fixture.session.state(), BoltState::InTransaction);

    let recorder = fixture.send(Request::Commit);
    assert_eq!(
        recorder.metadata().get("bookmark"),
        Some(&Value::from("bookmark:1"))
    );
    assert_eq!(fixture.session.state(), BoltState::Ready);
    assert!(!fixture.session.has_transaction());
}

#[rstest]
fn test_failed_begin_is_recoverable(ready: Fixture) {
    let mut fixture = ready;

    let recorder = fixture.send(Request::Begin(
        TransactionParameters::new().with_db("missing"),
    ));

    assert_eq!(
        recorder.failure().map(BoltError::code),
        Some("Neo.ClientError.Database.DatabaseNotFound")
    );
    assert_eq!(fixture.session.state(), BoltState::Failed);
    assert!(!fixture.session.has_transaction());
    fixture.send(Request::Reset);
    assert_eq!(fixture.session.state(), BoltState::Ready);
}

#[rstest]
fn test_syntax_error_then_reset(ready: Fixture) {
    let mut fixture = ready;
    fixture.send(Request::Begin(TransactionParameters::new()));

    let recorder = fixture.send(run("RETRUN 1"));
    assert_eq!(
        recorder.failure().map(BoltError::code),
        Some(status::STATEMENT_SYNTAX_ERROR)
    );
    assert_eq!(fixture.session.state(), BoltState::Failed);

    for request in [
        run("RETURN $x AS x"),
        Request::Pull(PullParameters::all()),
        Request::Commit,
    ] {
        assert_eq!(fixture.send(request).outcome(), Some(&Outcome::Ignored));
    }

    assert_eq!(fixture.send(Request::Reset).outcome(), Some(&Outcome::Success));
    assert_eq!(fixture.session.state(), BoltState::Ready);
    let journal = fixture.journal.lock();
    assert_eq!(journal.rolled_back, vec![TransactionHandle(1)]);
    assert_eq!(journal.reported.len(), 1);
    assert!(journal.committed.is_empty());
}

#[rstest]
fn test_protocol_breach_closes_the_session(ready: Fixture) {
    let mut fixture = ready;
    let mut recorder = ResponseRecorder::new();

    let res = fixture
        .session
        .process(Request::Pull(PullParameters::all()), &mut recorder);

    let Err(fatality) = res else {
        panic!("expected protocol breach");
    };
    assert!(fatality.is_protocol_breach());
    assert_eq!(
        fatality.message(),
        "PULL cannot be handled by a session in the READY state."
    );
    let error = recorder.failure().unwrap();
    assert_eq!(error.code(), status::REQUEST_INVALID);
    assert!(error.is_fatal());
    assert!(fixture.session.is_closed());
    assert_eq!(fixture.send(Request::Reset).outcome(), Some(&Outcome::Ignored));
}

#[rstest]
fn test_interrupts_roll_back_after_matching_resets(ready: Fixture) {
    let mut fixture = ready;
    let handle = fixture.session.handle();
    fixture.send(Request::Begin(TransactionParameters::new()));

    handle.interrupt();
    handle.interrupt();

    assert_eq!(fixture.send(run("RETURN $x AS x")).outcome(), Some(&Outcome::Ignored));
    assert_eq!(fixture.session.state(), BoltState::Interrupted);
    assert_eq!(fixture.send(Request::Reset).outcome(), Some(&Outcome::Ignored));
    assert!(fixture.session.has_transaction());
    assert_eq!(fixture.send(Request::Reset).outcome(), Some(&Outcome::Success));
    assert_eq!(fixture.session.state(), BoltState::Ready);
    assert!(!fixture.session.has_transaction());
    let journal = fixture.journal.lock();
    assert_eq!(journal.rolled_back, vec![TransactionHandle(1)]);
    assert!(journal.reported.is_empty());
}

#[rstest]
fn test_stashed_failure_reaches_next_request(ready: Fixture) {
    let mut fixture = ready;
    let no_threads = BoltError::new(
        status::REQUEST_NO_THREADS_AVAILABLE,
        "There are no available threads to serve this request at the moment.",
    );

    fixture.session.mark_failed(no_threads.clone());
    assert_eq!(fixture.session.pending_error(), Some(&no_threads));

    let recorder = fixture.send(run("RETURN $x AS x"));
    assert_eq!(recorder.outcomes(), &[Outcome::Failure(no_threads.clone())]);
    assert!(recorder.metadata().is_empty());
    assert!(fixture.session.pending_error().is_none());
    assert_eq!(fixture.journal.lock().reported, vec![no_threads]);
    assert!(fixture.journal.lock().committed.is_empty());
}

#[rstest]
fn test_termination_is_not_reported(ready: Fixture) {
    let mut fixture = ready;
    *fixture.killer.lock() = Some(fixture.session.handle());
    fixture.send(run(KILL_QUERY));

    let recorder = fixture.send(Request::Pull(PullParameters::all()));

    assert_eq!(recorder.outcome(), Some(&Outcome::Ignored));
    assert!(fixture.journal.lock().reported.is_empty());
    assert!(fixture.session.handle().will_terminate());

    let recorder = fixture.send(run("RETURN $x AS x"));
    assert_eq!(recorder.outcome(), Some(&Outcome::Ignored));
    assert!(fixture.session.is_closed());
    let journal = fixture.journal.lock();
    assert_eq!(journal.terminated, vec!["bolt-42"]);
    assert_eq!(journal.rolled_back, vec![TransactionHandle(1)]);
}

#[rstest]
fn test_callbacks(ready: Fixture) {
    let mut fixture = ready;
    let seen = Rc::new(RefCell::new(Vec::new()));
    let summaries = Rc::new(RefCell::new(0));
    fixture.send(unwind(2));

    let mut callbacks = {
        let records = Rc::clone(&seen);
        let on_success = Rc::clone(&seen);
        let summaries = Rc::clone(&summaries);
        ResponseCallbacks::new()
            .with_on_record(move |fields| {
                records.borrow_mut().push(fields[0].clone());
                Ok(())
            })
            .with_on_success(move |meta| {
                on_success
                    .borrow_mut()
                    .push(meta.get("bookmark").cloned().unwrap_or(Value::Null));
            })
            .with_on_summary(move || *summaries.borrow_mut() += 1)
    };
    fixture
        .session
        .process(Request::Pull(PullParameters::all()), &mut callbacks)
        .unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![Value::from(1), Value::from(2), Value::from("bookmark:1")]
    );
    assert_eq!(*summaries.borrow(), 1);
}

#[rstest]
fn test_close_rolls_back_open_transaction(ready: Fixture) {
    let mut fixture = ready;
    fixture.send(Request::Begin(TransactionParameters::new()));

    fixture.session.close();
    fixture.session.close();

    assert_eq!(fixture.session.state(), BoltState::Closed);
    let journal = fixture.journal.lock();
    assert_eq!(journal.rolled_back, vec![TransactionHandle(1)]);
    assert_eq!(journal.terminated, vec!["bolt-42"]);
}
