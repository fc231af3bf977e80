use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use mocksmith_api::{Condition, ConditionItem, ResponseSpec};
use mocksmith_interact::{Body, Request, Response};

use crate::render::RenderContext;
use crate::{MatchPlugin, MockPlugin, PluginError};

/// The basic matcher and responder: operator-tree conditions and template
/// responses.
#[derive(Default)]
pub struct SimplePlugin;

impl SimplePlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MatchPlugin for SimplePlugin {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn matches(
        &self,
        request: &Request,
        condition: &Condition,
    ) -> Result<bool, PluginError> {
        let Condition::Simple(simple) = condition else {
            return Ok(false);
        };
        let ctx = RenderContext::new(request);
        if simple.use_or_among_items {
            for item in &simple.items {
                if evaluate_item(&ctx, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        } else {
            for item in &simple.items {
                if !evaluate_item(&ctx, item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

#[async_trait]
impl MockPlugin for SimplePlugin {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn mock_response(
        &self,
        spec: Option<&ResponseSpec>,
        request: &Request,
        response: &mut Response,
    ) -> Result<bool, PluginError> {
        let Some(ResponseSpec::Simple(simple)) = spec else {
            return Ok(false);
        };
        let ctx = RenderContext::new(request);
        response.code = simple.code;
        response.header = simple
            .header
            .iter()
            .map(|(key, value)| (key.clone(), ctx.render(value)))
            .collect();
        response.trailer = simple.trailer.clone();
        let body = ctx.render_template(&simple.body)?;
        response.body = Body::from(body);
        Ok(false)
    }
}

fn evaluate_item(ctx: &RenderContext, item: &ConditionItem) -> Result<bool, PluginError> {
    let operand_x = ctx.render(&item.operand_x);
    let operand_y = ctx.render(&item.operand_y);
    let matched = evaluate(&operand_x, &item.operator, &operand_y)?;
    Ok(matched ^ item.opposite)
}

/// Operator semantics over rendered operands. Numeric comparisons treat
/// non-parseable operands as 0; an invalid `regex` operand matches nothing
/// rather than erroring.
fn evaluate(operand_x: &str, operator: &str, operand_y: &str) -> Result<bool, PluginError> {
    match operator {
        "=" | "==" | "===" => Ok(operand_x == operand_y),
        "!=" => Ok(operand_x != operand_y),
        ">" => Ok(number(operand_x) > number(operand_y)),
        ">=" => Ok(number(operand_x) >= number(operand_y)),
        "<" => Ok(number(operand_x) < number(operand_y)),
        "<=" => Ok(number(operand_x) <= number(operand_y)),
        "regex" => match Regex::new(operand_y) {
            Ok(expr) => Ok(expr.is_match(operand_x)),
            Err(err) => {
                warn!(%err, "invalid regex operand");
                Ok(false)
            }
        },
        "in" => Ok(operand_y.contains(operand_x)),
        unknown => Err(PluginError::UnknownOperator(unknown.to_string())),
    }
}

fn number(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}
