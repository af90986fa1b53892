//! JSON form of Substrait plans

use prost::Message;
use substrait::proto::Plan;

use crate::error::Result;

pub fn plan_from_json(json: &str) -> Result<Plan> {
    Ok(serde_json::from_str(json)?)
}

pub fn plan_to_json(plan: &Plan) -> Result<String> {
    Ok(serde_json::to_string_pretty(plan)?)
}

/// Convert a JSON plan to its binary encoding
pub fn json_to_binary(json: &str) -> Result<Vec<u8>> {
    Ok(plan_from_json(json)?.encode_to_vec())
}

pub fn binary_to_json(bytes: &[u8]) -> Result<String> {
    plan_to_json(&Plan::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "version": {"minorNumber": 53, "producer": "test"},
            "relations": []
        }"#;
        let plan = plan_from_json(json).unwrap();
        assert_eq!(plan.version.as_ref().map(|v| v.minor_number), Some(53));

        let again = plan_from_json(&plan_to_json(&plan).unwrap()).unwrap();
        assert_eq!(again, plan);

        let binary = json_to_binary(json).unwrap();
        let from_binary = plan_from_json(&binary_to_json(&binary).unwrap()).unwrap();
        assert_eq!(from_binary, plan);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            plan_from_json("{ not json"),
            Err(crate::error::SubstraitError::Json(_))
        ));
    }
}
