use minijinja::{context, Environment};

const TOOL_RUN_TEMPLATE: &str = include_str!("prompts/tool_run.j2");
const TOOL_REPLY_TEMPLATE: &str = include_str!("prompts/tool_reply.j2");

pub struct ToolRunLineContext<'a> {
    pub tool_name: &'a str,
    /// One of `completed`, `processing`, `rejected`, `failed`.
    pub state: &'a str,
    pub detail: &'a str,
}

pub fn render_tool_run_line(ctx: &ToolRunLineContext<'_>) -> String {
    let mut env = Environment::new();
    if env.add_template("tool_run", TOOL_RUN_TEMPLATE).is_err() {
        return fallback_tool_run_line(ctx);
    }

    let Ok(template) = env.get_template("tool_run") else {
        return fallback_tool_run_line(ctx);
    };

    template
        .render(context! {
            tool_name => ctx.tool_name,
            state => ctx.state,
            detail => ctx.detail.trim(),
        })
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|_| fallback_tool_run_line(ctx))
}

fn fallback_tool_run_line(ctx: &ToolRunLineContext<'_>) -> String {
    let detail = ctx.detail.trim();
    match ctx.state {
        "completed" => format!("Done: \"{}\" finished.", ctx.tool_name),
        "processing" => format!(
            "I am processing your request with \"{}\" and will let you know as soon as it is done.",
            ctx.tool_name
        ),
        _ if detail.is_empty() => format!("An error occurred running \"{}\".", ctx.tool_name),
        _ => format!("An error occurred running \"{}\": {}.", ctx.tool_name, detail),
    }
}

pub struct ToolReplyContext<'a> {
    pub agent_text: &'a str,
    pub lines: &'a [String],
}

/// The agent's own text followed by one paragraph per tool run.
pub fn render_tool_reply(ctx: &ToolReplyContext<'_>) -> String {
    let mut env = Environment::new();
    if env.add_template("tool_reply", TOOL_REPLY_TEMPLATE).is_err() {
        return fallback_tool_reply(ctx);
    }

    let Ok(template) = env.get_template("tool_reply") else {
        return fallback_tool_reply(ctx);
    };

    template
        .render(context! {
            agent_text => ctx.agent_text.trim(),
            lines => ctx.lines,
        })
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|_| fallback_tool_reply(ctx))
}

fn fallback_tool_reply(ctx: &ToolReplyContext<'_>) -> String {
    let mut parts = Vec::new();
    if !ctx.agent_text.trim().is_empty() {
        parts.push(ctx.agent_text.trim().to_string());
    }
    parts.extend(ctx.lines.iter().cloned());
    parts.join("\n\n")
}
