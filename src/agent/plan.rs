//! Plan model and parser
//!
//! The planner LM emits prose with an embedded `<plan>` block. The parser
//! anchors on the first block and reads its fields with a lenient tag
//! scanner: the format is versionless pseudo-XML and the surrounding chatter
//! must not break extraction. Document order of context items, steps, and
//! step arguments is preserved.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Plan parse failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanParseError {
    #[error("no <plan> block found in response")]
    NoPlanBlock,

    #[error("malformed plan block: {0}")]
    MalformedXml(String),

    #[error("invalid complexity: {0:?}")]
    InvalidComplexity(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("needs_tools is true but the plan has no steps")]
    InconsistentNeedsTools,
}

/// How involved the planner judged the request to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Tool,
    MultiStep,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Tool => "tool",
            Complexity::MultiStep => "multi_step",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "simple" => Some(Complexity::Simple),
            "tool" => Some(Complexity::Tool),
            "multi_step" => Some(Complexity::MultiStep),
            _ => None,
        }
    }
}

/// A structured description of what to do next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub intent: String,
    pub complexity: Complexity,
    pub needs_tools: bool,
    pub ready_to_answer: bool,
    pub context: Vec<String>,
    pub steps: Vec<PlanStep>,
}

/// One tool invocation within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub depends_on: Option<String>,
    pub tool: String,
    pub purpose: String,
    pub args: Vec<PlanArg>,
}

/// A named argument; value is kept verbatim, trimming happens in `args_map`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanArg {
    pub name: String,
    pub value: String,
}

impl PlanStep {
    /// Argument map as passed to tools: values trimmed, empties preserved
    pub fn args_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.args
            .iter()
            .map(|arg| (arg.name.clone(), serde_json::Value::String(arg.value.trim().to_string())))
            .collect()
    }
}

impl Plan {
    /// Re-serialize the plan to its wire format
    ///
    /// Step order, argument order, and dependency edges survive a
    /// parse/serialize round trip.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<plan>\n");
        out.push_str(&format!("  <intent>{}</intent>\n", self.intent));
        out.push_str(&format!("  <complexity>{}</complexity>\n", self.complexity.as_str()));
        out.push_str(&format!("  <needs_tools>{}</needs_tools>\n", self.needs_tools));
        out.push_str(&format!("  <ready_to_answer>{}</ready_to_answer>\n", self.ready_to_answer));

        if self.context.is_empty() {
            out.push_str("  <context></context>\n");
        } else {
            out.push_str("  <context>\n");
            for item in &self.context {
                out.push_str(&format!("    <item>{item}</item>\n"));
            }
            out.push_str("  </context>\n");
        }

        if self.steps.is_empty() {
            out.push_str("  <steps></steps>\n");
        } else {
            out.push_str("  <steps>\n");
            for step in &self.steps {
                match &step.depends_on {
                    Some(dep) => out.push_str(&format!("    <step id=\"{}\" depends_on=\"{}\">\n", step.id, dep)),
                    None => out.push_str(&format!("    <step id=\"{}\">\n", step.id)),
                }
                out.push_str(&format!("      <tool>{}</tool>\n", step.tool));
                out.push_str(&format!("      <purpose>{}</purpose>\n", step.purpose));
                if step.args.is_empty() {
                    out.push_str("      <args></args>\n");
                } else {
                    out.push_str("      <args>\n");
                    for arg in &step.args {
                        out.push_str(&format!("        <arg name=\"{}\">{}</arg>\n", arg.name, arg.value));
                    }
                    out.push_str("      </args>\n");
                }
                out.push_str("    </step>\n");
            }
            out.push_str("  </steps>\n");
        }

        out.push_str("</plan>");
        out
    }
}

/// Extract a `Plan` from free-form LM text
///
/// Everything outside the first `<plan>...</plan>` block is ignored.
pub fn parse_plan(content: &str) -> Result<Plan, PlanParseError> {
    let start = content.find("<plan>").ok_or(PlanParseError::NoPlanBlock)?;
    let body_start = start + "<plan>".len();
    let end = content[body_start..]
        .find("</plan>")
        .ok_or_else(|| PlanParseError::MalformedXml("unterminated <plan> block".to_string()))?;
    let body = &content[body_start..body_start + end];

    let intent = tag_content(body, "intent")
        .ok_or(PlanParseError::MissingField("intent"))?
        .trim()
        .to_string();

    let complexity_raw = tag_content(body, "complexity").ok_or(PlanParseError::MissingField("complexity"))?;
    let complexity_token = complexity_raw.trim();
    let complexity =
        Complexity::parse(complexity_token).ok_or_else(|| PlanParseError::InvalidComplexity(complexity_token.to_string()))?;

    let needs_tools = parse_bool(
        tag_content(body, "needs_tools").ok_or(PlanParseError::MissingField("needs_tools"))?,
        "needs_tools",
    )?;

    // Early plans omitted ready_to_answer; absence means another iteration
    let ready_to_answer = match tag_content(body, "ready_to_answer") {
        Some(raw) => parse_bool(raw, "ready_to_answer")?,
        None => false,
    };

    let context = match tag_content(body, "context") {
        Some(inner) => tag_blocks(inner, "item")
            .into_iter()
            .map(|block| block.inner.trim().to_string())
            .collect(),
        None => Vec::new(),
    };

    let steps = match tag_content(body, "steps") {
        Some(inner) => parse_steps(inner)?,
        None => Vec::new(),
    };

    if needs_tools && steps.is_empty() && !ready_to_answer {
        return Err(PlanParseError::InconsistentNeedsTools);
    }

    Ok(Plan {
        intent,
        complexity,
        needs_tools,
        ready_to_answer,
        context,
        steps,
    })
}

fn parse_steps(inner: &str) -> Result<Vec<PlanStep>, PlanParseError> {
    let mut steps = Vec::new();

    for block in tag_blocks(inner, "step") {
        let id = attr_value(block.attrs, "id")
            .filter(|id| !id.is_empty())
            .ok_or(PlanParseError::MissingField("step id"))?;
        let depends_on = attr_value(block.attrs, "depends_on").filter(|dep| !dep.is_empty());

        let tool = tag_content(block.inner, "tool")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(PlanParseError::MissingField("tool"))?;
        let purpose = tag_content(block.inner, "purpose").map(|p| p.trim().to_string()).unwrap_or_default();

        let args = match tag_content(block.inner, "args") {
            Some(args_inner) => {
                let mut args = Vec::new();
                for arg_block in tag_blocks(args_inner, "arg") {
                    let name = attr_value(arg_block.attrs, "name")
                        .filter(|n| !n.is_empty())
                        .ok_or(PlanParseError::MissingField("arg name"))?;
                    args.push(PlanArg {
                        name,
                        value: arg_block.inner.to_string(),
                    });
                }
                args
            }
            None => Vec::new(),
        };

        steps.push(PlanStep {
            id,
            depends_on,
            tool,
            purpose,
            args,
        });
    }

    Ok(steps)
}

fn parse_bool(raw: &str, field: &str) -> Result<bool, PlanParseError> {
    match raw.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(PlanParseError::MalformedXml(format!(
            "invalid boolean {other:?} in <{field}>"
        ))),
    }
}

/// A matched tag occurrence: attribute text and inner content
struct TagBlock<'a> {
    attrs: &'a str,
    inner: &'a str,
}

/// Find the first occurrence of `<tag ...>...</tag>` (or `<tag/>`) at or
/// after `from`. Returns the block and the offset just past it.
fn find_tag<'a>(body: &'a str, tag: &str, from: usize) -> Option<(TagBlock<'a>, usize)> {
    let open = format!("<{tag}");
    let mut search = from;

    loop {
        let start = body[search..].find(&open)? + search;
        let after_name = start + open.len();
        let rest = &body[after_name..];

        // The tag name must be terminated by '>', '/', or whitespace,
        // otherwise this is a longer tag that shares the prefix.
        match rest.chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {}
            _ => {
                search = after_name;
                continue;
            }
        }

        let gt = rest.find('>')?;
        let head = rest[..gt].trim_end();
        let self_closing = head.ends_with('/');
        let attrs = head.trim_end_matches('/').trim();
        let content_start = after_name + gt + 1;

        if self_closing {
            return Some((TagBlock { attrs, inner: "" }, content_start));
        }

        let close = format!("</{tag}>");
        let close_rel = body[content_start..].find(&close)?;
        let inner = &body[content_start..content_start + close_rel];
        return Some((TagBlock { attrs, inner }, content_start + close_rel + close.len()));
    }
}

/// Inner content of the first `<tag>` in `body`; `<tag/>` yields `""`
fn tag_content<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    find_tag(body, tag, 0).map(|(block, _)| block.inner)
}

/// All occurrences of `<tag>` in `body`, in document order
fn tag_blocks<'a>(body: &'a str, tag: &str) -> Vec<TagBlock<'a>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while let Some((block, next)) = find_tag(body, tag, pos) {
        blocks.push(block);
        pos = next;
    }
    blocks
}

/// Attribute value from a tag's attribute text, e.g. `id="step_1"`
fn attr_value(attrs: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=");
    let mut search = 0;

    loop {
        let at = attrs[search..].find(&needle)? + search;
        // Must be at a word boundary, not a suffix of another attribute name
        if at > 0 {
            let before = attrs[..at].chars().next_back();
            if before.is_some_and(|c| !c.is_whitespace()) {
                search = at + needle.len();
                continue;
            }
        }

        let rest = &attrs[at + needle.len()..];
        let quote = rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            search = at + needle.len();
            continue;
        }
        let value_start = 1;
        let value_end = rest[value_start..].find(quote)? + value_start;
        return Some(rest[value_start..value_end].to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_plan() {
        let content = r#"Here is my analysis:
<plan>
  <intent>Answer a simple math question</intent>
  <complexity>simple</complexity>
  <needs_tools>false</needs_tools>
  <context>
    <item>User is asking about basic arithmetic</item>
  </context>
  <steps></steps>
</plan>
Done."#;

        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.intent, "Answer a simple math question");
        assert_eq!(plan.complexity, Complexity::Simple);
        assert!(!plan.needs_tools);
        assert!(!plan.ready_to_answer);
        assert_eq!(plan.context, vec!["User is asking about basic arithmetic"]);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_parse_single_tool_plan() {
        let content = r#"<plan>
  <intent>Get the current time</intent>
  <complexity>tool</complexity>
  <needs_tools>true</needs_tools>
  <context>
    <item>User wants to know the time</item>
  </context>
  <steps>
    <step id="step_1">
      <tool>shell</tool>
      <purpose>Get current date and time</purpose>
      <args>
        <arg name="command">date</arg>
      </args>
    </step>
  </steps>
</plan>"#;

        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.complexity, Complexity::Tool);
        assert!(plan.needs_tools);
        assert_eq!(plan.steps.len(), 1);

        let step = &plan.steps[0];
        assert_eq!(step.id, "step_1");
        assert_eq!(step.tool, "shell");
        assert_eq!(step.purpose, "Get current date and time");
        assert_eq!(step.args_map()["command"], "date");
    }

    #[test]
    fn test_parse_multi_step_dependencies() {
        let content = r#"<plan>
  <intent>List files and show first one</intent>
  <complexity>multi_step</complexity>
  <needs_tools>true</needs_tools>
  <context></context>
  <steps>
    <step id="step_1">
      <tool>shell</tool>
      <purpose>List files</purpose>
      <args>
        <arg name="command">ls</arg>
      </args>
    </step>
    <step id="step_2" depends_on="step_1">
      <tool>shell</tool>
      <purpose>Show first file</purpose>
      <args>
        <arg name="command">head -10 file.txt</arg>
      </args>
    </step>
  </steps>
</plan>"#;

        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.complexity, Complexity::MultiStep);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].depends_on, None);
        assert_eq!(plan.steps[1].depends_on.as_deref(), Some("step_1"));
    }

    #[test]
    fn test_no_plan_block() {
        let err = parse_plan("This response has no plan block").unwrap_err();
        assert_eq!(err, PlanParseError::NoPlanBlock);
    }

    #[test]
    fn test_unterminated_plan_block() {
        let err = parse_plan("<plan><intent>x</intent>").unwrap_err();
        assert!(matches!(err, PlanParseError::MalformedXml(_)));
    }

    #[test]
    fn test_invalid_complexity() {
        let content = "<plan><intent>Test</intent><complexity>unknown</complexity><needs_tools>false</needs_tools><context></context><steps></steps></plan>";
        let err = parse_plan(content).unwrap_err();
        assert_eq!(err, PlanParseError::InvalidComplexity("unknown".to_string()));
    }

    #[test]
    fn test_missing_intent() {
        let content = "<plan><complexity>simple</complexity><needs_tools>false</needs_tools></plan>";
        let err = parse_plan(content).unwrap_err();
        assert_eq!(err, PlanParseError::MissingField("intent"));
    }

    #[test]
    fn test_invalid_bool() {
        let content = "<plan><intent>T</intent><complexity>simple</complexity><needs_tools>maybe</needs_tools></plan>";
        let err = parse_plan(content).unwrap_err();
        assert!(matches!(err, PlanParseError::MalformedXml(_)));
    }

    #[test]
    fn test_needs_tools_without_steps_rejected() {
        let content = "<plan><intent>T</intent><complexity>tool</complexity><needs_tools>true</needs_tools><context></context><steps></steps></plan>";
        let err = parse_plan(content).unwrap_err();
        assert_eq!(err, PlanParseError::InconsistentNeedsTools);
    }

    #[test]
    fn test_needs_tools_without_steps_accepted_when_ready() {
        // Terminal iteration: the planner keeps needs_tools=true from the
        // previous round but has nothing left to run.
        let content = "<plan><intent>T</intent><complexity>tool</complexity><needs_tools>true</needs_tools><ready_to_answer>true</ready_to_answer><context></context><steps></steps></plan>";
        let plan = parse_plan(content).unwrap();
        assert!(plan.ready_to_answer);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_first_plan_block_wins() {
        let content = r#"
<plan><intent>First</intent><complexity>simple</complexity><needs_tools>false</needs_tools></plan>
<plan><intent>Second</intent><complexity>simple</complexity><needs_tools>false</needs_tools></plan>
"#;
        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.intent, "First");
    }

    #[test]
    fn test_self_closing_sections() {
        let content = "<plan><intent>T</intent><complexity>simple</complexity><needs_tools>false</needs_tools><context/><steps/></plan>";
        let plan = parse_plan(content).unwrap();
        assert!(plan.context.is_empty());
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_args_map_trims_values() {
        let step = PlanStep {
            id: "s".to_string(),
            depends_on: None,
            tool: "shell".to_string(),
            purpose: String::new(),
            args: vec![
                PlanArg {
                    name: "command".to_string(),
                    value: "  ls -la  ".to_string(),
                },
                PlanArg {
                    name: "timeout".to_string(),
                    value: "30".to_string(),
                },
            ],
        };

        let args = step.args_map();
        assert_eq!(args["command"], "ls -la");
        assert_eq!(args["timeout"], "30");
    }

    #[test]
    fn test_empty_arg_value_preserved() {
        let content = r#"<plan><intent>T</intent><complexity>tool</complexity><needs_tools>true</needs_tools><context></context><steps>
<step id="s1"><tool>shell</tool><purpose>p</purpose><args><arg name="command"></arg></args></step>
</steps></plan>"#;

        let plan = parse_plan(content).unwrap();
        let args = plan.steps[0].args_map();
        assert_eq!(args["command"], "");
    }

    #[test]
    fn test_step_without_id_rejected() {
        let content = r#"<plan><intent>T</intent><complexity>tool</complexity><needs_tools>true</needs_tools><steps>
<step><tool>shell</tool><purpose>p</purpose><args></args></step>
</steps></plan>"#;
        let err = parse_plan(content).unwrap_err();
        assert_eq!(err, PlanParseError::MissingField("step id"));
    }

    #[test]
    fn test_empty_depends_on_is_none() {
        let content = r#"<plan><intent>T</intent><complexity>tool</complexity><needs_tools>true</needs_tools><steps>
<step id="s1" depends_on=""><tool>shell</tool><purpose>p</purpose><args></args></step>
</steps></plan>"#;
        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.steps[0].depends_on, None);
    }

    #[test]
    fn test_roundtrip_preserves_structure() {
        let content = r#"<plan>
  <intent>List files and inspect one</intent>
  <complexity>multi_step</complexity>
  <needs_tools>true</needs_tools>
  <ready_to_answer>false</ready_to_answer>
  <context>
    <item>first note</item>
    <item>second note</item>
  </context>
  <steps>
    <step id="step_1">
      <tool>shell</tool>
      <purpose>List files</purpose>
      <args>
        <arg name="command">ls</arg>
        <arg name="extra">  spaced  </arg>
      </args>
    </step>
    <step id="step_2" depends_on="step_1">
      <tool>shell</tool>
      <purpose>Read file</purpose>
      <args>
        <arg name="command">cat file.txt</arg>
      </args>
    </step>
  </steps>
</plan>"#;

        let plan = parse_plan(content).unwrap();
        let reparsed = parse_plan(&plan.to_xml()).unwrap();
        assert_eq!(plan, reparsed);
    }

    #[test]
    fn test_attr_value_quoting() {
        assert_eq!(attr_value(r#"id="step_1""#, "id").as_deref(), Some("step_1"));
        assert_eq!(attr_value("id='step_1'", "id").as_deref(), Some("step_1"));
        assert_eq!(
            attr_value(r#"id="a" depends_on="b""#, "depends_on").as_deref(),
            Some("b")
        );
        assert_eq!(attr_value(r#"id="a""#, "depends_on"), None);
    }
}
