//! Host↔VM wire protocol.
//!
//! One JSON payload per call on the runner's command line; one JSON reply as
//! the final stdout line. Values that do not survive JSON do not survive
//! this protocol; there is no structured-clone channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::provider::CommandOutput;

/// One stub-originated call: function id, positional arguments, and the
/// captured closure values for nested functions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxFnCall {
    pub fn_id: String,
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closure_vars: Option<Map<String, Value>>,
}

impl SandboxFnCall {
    pub fn new(fn_id: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            fn_id: fn_id.into(),
            args,
            closure_vars: None,
        }
    }

    #[must_use]
    pub fn closure_vars(mut self, vars: Map<String, Value>) -> Self {
        self.closure_vars = Some(vars);
        self
    }
}

/// The runner's command-line payload; the function id travels separately as
/// its own argument.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Payload<'a> {
    args: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    closure_vars: Option<&'a Map<String, Value>>,
}

pub(crate) fn payload_json(call: &SandboxFnCall) -> Result<String> {
    Ok(serde_json::to_string(&Payload {
        args: &call.args,
        closure_vars: call.closure_vars.as_ref(),
    })?)
}

/// Parse the final stdout line of a runner invocation.
///
/// `__result` resolves the call; `__error` reconstructs the remote failure
/// with its stack; anything else is wrapped with both streams verbatim.
pub(crate) fn parse_reply(output: &CommandOutput) -> Result<Value> {
    let protocol_error = || Error::Protocol {
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    };

    let line = output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .ok_or_else(protocol_error)?;

    let value: Value = serde_json::from_str(line).map_err(|_| protocol_error())?;
    let reply = value.as_object().ok_or_else(protocol_error)?;

    if let Some(error) = reply.get("__error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let stack = reply
            .get("__stack")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        return Err(Error::Script { message, stack });
    }

    reply.get("__result").cloned().ok_or_else(protocol_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: 0,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        }
    }

    #[test]
    fn payload_omits_absent_closure() {
        let call = SandboxFnCall::new("readFile_ab12cd34", vec![json!("abcde")]);
        assert_eq!(payload_json(&call).unwrap(), "{\"args\":[\"abcde\"]}");
    }

    #[test]
    fn payload_includes_closure_vars() {
        let mut vars = Map::new();
        vars.insert("prefix".into(), json!("p-"));
        let call = SandboxFnCall::new("outer$inner_ab12cd34", vec![json!("y")]).closure_vars(vars);
        assert_eq!(
            payload_json(&call).unwrap(),
            "{\"args\":[\"y\"],\"closureVars\":{\"prefix\":\"p-\"}}"
        );
    }

    #[test]
    fn result_comes_from_final_line() {
        let out = output("guest noise\n{\"__result\":5}\n", "");
        assert_eq!(parse_reply(&out).unwrap(), json!(5));
    }

    #[test]
    fn error_reply_reconstructs_message_and_stack() {
        let out = output(
            "{\"__error\":\"nope\",\"__stack\":\"Error: nope\\n    at x\"}\n",
            "",
        );
        let err = parse_reply(&out).unwrap_err();
        match err {
            Error::Script { message, stack } => {
                assert_eq!(message, "nope");
                assert!(stack.unwrap().contains("at x"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn garbage_output_wraps_both_streams() {
        let out = output("not json at all", "boom");
        let err = parse_reply(&out).unwrap_err();
        match err {
            Error::Protocol { stdout, stderr } => {
                assert_eq!(stdout, "not json at all");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_stdout_is_a_protocol_error() {
        let err = parse_reply(&output("", "died early")).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
