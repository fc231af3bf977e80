//! Conversions between the generated management messages and the rule model.

use std::time::Duration;

use mocksmith_api as api;

use crate::pb;

impl From<pb::MockApi> for api::MockApi {
    fn from(value: pb::MockApi) -> Self {
        Self {
            unique_key: value.unique_key,
            host: value.host,
            path: value.path,
            method: value.method,
            cases: value.cases.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<api::MockApi> for pb::MockApi {
    fn from(value: api::MockApi) -> Self {
        Self {
            unique_key: value.unique_key,
            host: value.host,
            path: value.path,
            method: value.method,
            cases: value.cases.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<pb::mock_api::Case> for api::Case {
    fn from(value: pb::mock_api::Case) -> Self {
        Self {
            condition: value.condition.and_then(|c| c.condition.map(Into::into)),
            response: value.response.and_then(|r| r.response.map(Into::into)),
        }
    }
}

impl From<api::Case> for pb::mock_api::Case {
    fn from(value: api::Case) -> Self {
        Self {
            condition: value.condition.map(|condition| pb::mock_api::Condition {
                condition: Some(condition.into()),
            }),
            response: value.response.map(|response| pb::mock_api::Response {
                response: Some(response.into()),
            }),
        }
    }
}

impl From<pb::mock_api::condition::Condition> for api::Condition {
    fn from(value: pb::mock_api::condition::Condition) -> Self {
        match value {
            pb::mock_api::condition::Condition::Simple(simple) => {
                api::Condition::Simple(api::SimpleCondition {
                    use_or_among_items: simple.use_or_among_items,
                    items: simple.items.into_iter().map(Into::into).collect(),
                })
            }
            pb::mock_api::condition::Condition::Script(script) => {
                api::Condition::Script(api::ScriptCondition {
                    lang: script.lang,
                    content: script.content,
                })
            }
        }
    }
}

impl From<api::Condition> for pb::mock_api::condition::Condition {
    fn from(value: api::Condition) -> Self {
        match value {
            api::Condition::Simple(simple) => {
                pb::mock_api::condition::Condition::Simple(pb::mock_api::SimpleCondition {
                    use_or_among_items: simple.use_or_among_items,
                    items: simple.items.into_iter().map(Into::into).collect(),
                })
            }
            api::Condition::Script(script) => {
                pb::mock_api::condition::Condition::Script(pb::mock_api::ScriptCondition {
                    lang: script.lang,
                    content: script.content,
                })
            }
        }
    }
}

impl From<pb::mock_api::SimpleConditionItem> for api::ConditionItem {
    fn from(value: pb::mock_api::SimpleConditionItem) -> Self {
        Self {
            operand_x: value.operand_x,
            operator: value.operator,
            operand_y: value.operand_y,
            opposite: value.opposite,
        }
    }
}

impl From<api::ConditionItem> for pb::mock_api::SimpleConditionItem {
    fn from(value: api::ConditionItem) -> Self {
        Self {
            operand_x: value.operand_x,
            operator: value.operator,
            operand_y: value.operand_y,
            opposite: value.opposite,
        }
    }
}

impl From<pb::mock_api::response::Response> for api::ResponseSpec {
    fn from(value: pb::mock_api::response::Response) -> Self {
        match value {
            pb::mock_api::response::Response::Simple(simple) => {
                api::ResponseSpec::Simple(api::SimpleResponse {
                    code: simple.code,
                    header: simple.header,
                    trailer: simple.trailer,
                    body: simple.body,
                })
            }
            pb::mock_api::response::Response::Script(script) => {
                api::ResponseSpec::Script(api::ScriptResponse {
                    lang: script.lang,
                    content: script.content,
                    timeout: script.timeout.and_then(duration_from_proto),
                })
            }
        }
    }
}

impl From<api::ResponseSpec> for pb::mock_api::response::Response {
    fn from(value: api::ResponseSpec) -> Self {
        match value {
            api::ResponseSpec::Simple(simple) => {
                pb::mock_api::response::Response::Simple(pb::mock_api::SimpleResponse {
                    code: simple.code,
                    header: simple.header,
                    trailer: simple.trailer,
                    body: simple.body,
                })
            }
            api::ResponseSpec::Script(script) => {
                pb::mock_api::response::Response::Script(pb::mock_api::ScriptResponse {
                    lang: script.lang,
                    content: script.content,
                    timeout: script.timeout.map(duration_to_proto),
                })
            }
        }
    }
}

fn duration_from_proto(value: prost_types::Duration) -> Option<Duration> {
    if value.seconds < 0 || value.nanos < 0 {
        return None;
    }
    Some(Duration::new(value.seconds as u64, value.nanos as u32))
}

fn duration_to_proto(value: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: value.as_secs() as i64,
        nanos: value.subsec_nanos() as i32,
    }
}
