use vigil_api::message::{ControlMessage, Message, Payload, Signal};
use vigil_api::WorkerId;

#[test]
fn test_worker_id_format() {
    let id = WorkerId::indexed("tester", 3);

    assert_eq!(id.as_str(), "tester-3");
    assert_eq!(id.to_string(), "tester-3");
    assert_eq!(id, WorkerId::from("tester-3"));
}

#[test]
fn test_unaddressed_message_reaches_anyone() {
    let message = Message::record(WorkerId::orchestrator(), 42u32);

    assert!(message.destination().is_none());
    assert!(message.is_addressed_to(&WorkerId::indexed("tester", 0)));
    assert!(message.is_addressed_to(&WorkerId::indexed("miner", 7)));
}

#[test]
fn test_addressed_message() {
    let target = WorkerId::indexed("miner", 1);
    let message: Message<u32> =
        Message::signal(WorkerId::indexed("tester", 0), Signal::Wait).with_destination(target.clone());

    assert_eq!(message.destination(), Some(&target));
    assert!(message.is_addressed_to(&target));
    assert!(!message.is_addressed_to(&WorkerId::indexed("miner", 2)));
    assert_eq!(message.payload().signal(), Some(Signal::Wait));
}

#[test]
fn test_payload_kinds() {
    let record: Payload<&str> = Payload::Record("example.org");
    let control: Payload<&str> = Payload::Control(Signal::Stop);

    assert!(record.is_record());
    assert!(record.signal().is_none());
    assert!(!control.is_record());
    assert_eq!(control.signal(), Some(Signal::Stop));
}

#[test]
fn test_into_payload_keeps_record() {
    let message = Message::record(WorkerId::orchestrator(), String::from("example.net"));
    let origin = message.origin().clone();

    match message.into_payload() {
        Payload::Record(subject) => assert_eq!(subject, "example.net"),
        Payload::Control(signal) => panic!("unexpected control token {signal}"),
    }
    assert_eq!(origin, WorkerId::orchestrator());
}

#[test]
fn test_control_message_constructors() {
    let origin = WorkerId::indexed("tester", 2);

    assert_eq!(ControlMessage::stop(origin.clone()).signal, Signal::Stop);
    assert_eq!(ControlMessage::wait(origin.clone()).signal, Signal::Wait);
    assert_eq!(ControlMessage::wait(origin.clone()).origin, origin);
}

#[test]
fn test_signal_serialization() {
    assert_eq!(serde_json::to_string(&Signal::Stop).unwrap(), "\"stop\"");
    assert_eq!(serde_json::to_string(&Signal::Wait).unwrap(), "\"wait\"");
    assert_eq!(Signal::Wait.to_string(), "wait");
}
