use fleetops_common::protocol::{
    admin::{DisableRobotRequest, DisableRobotResponse},
    notify::{Notification, NotifyAck},
};
use serde_json::Value;

#[test]
fn notification_frame_has_exactly_user_id_and_message() {
    let value = serde_json::to_value(Notification::new("u1", "Robot r1 has been disabled."))
        .expect("notification should serialize");
    assert_eq!(object_keys(&value), vec!["message".to_string(), "user_id".to_string()]);
    assert_eq!(value["user_id"], "u1");
}

#[test]
fn notification_decodes_from_operator_payload() {
    let parsed: Notification = serde_json::from_str(r#"{"user_id":"u1","message":"hi"}"#)
        .expect("payload should decode");
    assert_eq!(parsed, Notification::new("u1", "hi"));
}

#[test]
fn notify_ack_shape() {
    let value = serde_json::to_value(NotifyAck::delivered_to("u1")).expect("ack should serialize");
    assert_eq!(
        object_keys(&value),
        vec!["delivered".to_string(), "message".to_string(), "user_id".to_string()]
    );
}

#[test]
fn admin_request_round_trips_field_names() {
    let request = DisableRobotRequest { robot_id: "r1".into(), user_id: "u1".into() };
    let value = serde_json::to_value(&request).expect("request should serialize");
    assert_eq!(value["robot_id"], "r1");
    assert_eq!(value["user_id"], "u1");

    let response = DisableRobotResponse::initiated("disable_robot_workflow_r1", "run-1", "r1");
    let value = serde_json::to_value(&response).expect("response should serialize");
    assert_eq!(value["workflow_id"], "disable_robot_workflow_r1");
    assert_eq!(value["run_id"], "run-1");
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}
