//! Hand-off Parser (§4.4): extracts the fenced `next_agent:` block an
//! assistant run ends its transcript with, and formats one back for tests
//! and for composing comments.

use crate::model::{CiStatus, Handoff, NextAgent};

/// A transcript ended without a well-formed hand-off block, or the block's
/// fields failed validation (§4.4 "Parse failure produces a `BadHandoff`
/// error").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadHandoff {
    pub reason: String,
}

impl std::fmt::Display for BadHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bad hand-off: {}", self.reason)
    }
}

impl std::error::Error for BadHandoff {}

const FENCE_START: &str = "```";

/// Find the last well-formed hand-off block in `transcript` and parse it
/// (§4.4 "Find the last well-formed block in the transcript").
pub fn parse_handoff(transcript: &str) -> Result<Handoff, BadHandoff> {
    let block = last_fenced_block(transcript).ok_or_else(|| BadHandoff {
        reason: "no fenced block found in transcript".to_string(),
    })?;
    parse_block(&block)
}

fn last_fenced_block(transcript: &str) -> Option<String> {
    let mut blocks = Vec::new();
    let mut lines = transcript.lines().peekable();
    let mut current: Option<Vec<&str>> = None;

    while let Some(line) = lines.next() {
        if let Some(buf) = current.as_mut() {
            if line.trim_start().starts_with(FENCE_START) {
                blocks.push(buf.join("\n"));
                current = None;
            } else {
                buf.push(line);
            }
        } else if line.trim_start().starts_with(FENCE_START) {
            current = Some(Vec::new());
        }
    }

    blocks
        .into_iter()
        .rev()
        .find(|b| b.contains("next_agent:"))
}

fn parse_block(block: &str) -> Result<Handoff, BadHandoff> {
    let mut next_agent = None;
    let mut pr_number = None;
    let mut ci_status = None;
    let mut context = String::new();
    let mut in_context = false;

    for line in block.lines() {
        if in_context {
            if let Some(rest) = line.strip_prefix("  ") {
                if !context.is_empty() {
                    context.push('\n');
                }
                context.push_str(rest);
                continue;
            } else if line.trim().is_empty() {
                context.push('\n');
                continue;
            } else {
                in_context = false;
            }
        }

        if let Some(rest) = line.strip_prefix("next_agent:") {
            next_agent = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("pr_number:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                let n = rest.parse::<u64>().map_err(|_| BadHandoff {
                    reason: format!("pr_number is not an integer: {rest:?}"),
                })?;
                pr_number = Some(n);
            }
        } else if let Some(rest) = line.strip_prefix("ci_status:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                let status = CiStatus::parse(rest).ok_or_else(|| BadHandoff {
                    reason: format!("ci_status is not one of pending|passed|failed: {rest:?}"),
                })?;
                ci_status = Some(status);
            }
        } else if line.trim_start().starts_with("context:") {
            in_context = true;
            let inline = line.trim_start().trim_start_matches("context:").trim();
            let inline = inline.trim_start_matches('|').trim();
            if !inline.is_empty() {
                context.push_str(inline);
            }
        }
    }

    let next_agent_raw = next_agent.ok_or_else(|| BadHandoff {
        reason: "next_agent is required".to_string(),
    })?;
    let next_agent = NextAgent::parse(&next_agent_raw).ok_or_else(|| BadHandoff {
        reason: format!("next_agent is not a known role or sentinel: {next_agent_raw:?}"),
    })?;

    Ok(Handoff {
        next_agent,
        pr_number,
        ci_status,
        context: context.trim_end_matches('\n').to_string(),
    })
}

/// Render a hand-off back into the fenced-block form the assistant produces,
/// used by tests to check the round-trip law and by the router when quoting
/// a hand-off in a tracker comment.
pub fn format_handoff(h: &Handoff) -> String {
    let mut out = String::new();
    out.push_str(FENCE_START);
    out.push('\n');
    out.push_str(&format!("next_agent: {}\n", h.next_agent));
    if let Some(pr) = h.pr_number {
        out.push_str(&format!("pr_number: {pr}\n"));
    }
    if let Some(ci) = h.ci_status {
        out.push_str(&format!("ci_status: {ci}\n"));
    }
    out.push_str("context: |\n");
    for line in h.context.lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(FENCE_START);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(next_agent: NextAgent) -> Handoff {
        Handoff {
            next_agent,
            pr_number: Some(42),
            ci_status: Some(CiStatus::Pending),
            context: "Implemented the login flow.\nStill need tests.".to_string(),
        }
    }

    #[test]
    fn round_trips_a_role_handoff() {
        let h = sample(NextAgent::Role("quality_review".to_string()));
        let formatted = format_handoff(&h);
        let parsed = parse_handoff(&formatted).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn round_trips_done_and_blocked_with_no_pr_or_ci() {
        for sentinel in [NextAgent::Done, NextAgent::Blocked] {
            let h = Handoff {
                next_agent: sentinel,
                pr_number: None,
                ci_status: None,
                context: "All good.".to_string(),
            };
            let parsed = parse_handoff(&format_handoff(&h)).unwrap();
            assert_eq!(parsed, h);
        }
    }

    #[test]
    fn picks_the_last_well_formed_block_when_several_appear() {
        let transcript = format!(
            "some reasoning\n{}\nnot a handoff, just an example\n{}\n\n{}\nnext_agent: DONE\ncontext: |\n  finished\n{}\n",
            FENCE_START, FENCE_START, FENCE_START, FENCE_START
        );
        let parsed = parse_handoff(&transcript).unwrap();
        assert_eq!(parsed.next_agent, NextAgent::Done);
        assert_eq!(parsed.context, "finished");
    }

    #[test]
    fn missing_next_agent_is_bad_handoff() {
        let transcript = format!("{}\ncontext: |\n  no agent here\n{}\n", FENCE_START, FENCE_START);
        assert!(parse_handoff(&transcript).is_err());
    }

    #[test]
    fn unknown_role_is_bad_handoff() {
        let transcript = format!(
            "{}\nnext_agent: time_traveler\ncontext: |\n  nope\n{}\n",
            FENCE_START, FENCE_START
        );
        assert!(parse_handoff(&transcript).is_err());
    }

    #[test]
    fn non_integer_pr_number_is_bad_handoff() {
        let transcript = format!(
            "{}\nnext_agent: DONE\npr_number: not-a-number\ncontext: |\n  x\n{}\n",
            FENCE_START, FENCE_START
        );
        assert!(parse_handoff(&transcript).is_err());
    }

    #[test]
    fn invalid_ci_status_is_bad_handoff() {
        let transcript = format!(
            "{}\nnext_agent: DONE\nci_status: sideways\ncontext: |\n  x\n{}\n",
            FENCE_START, FENCE_START
        );
        assert!(parse_handoff(&transcript).is_err());
    }

    #[test]
    fn no_fenced_block_at_all_is_bad_handoff() {
        assert!(parse_handoff("just plain prose with no fences").is_err());
    }

    #[test]
    fn multiline_context_is_preserved_verbatim() {
        let h = Handoff {
            next_agent: NextAgent::Role("implementation".to_string()),
            pr_number: None,
            ci_status: None,
            context: "Line one.\n\nLine three after a blank line.".to_string(),
        };
        let parsed = parse_handoff(&format_handoff(&h)).unwrap();
        assert_eq!(parsed.context, h.context);
    }
}
