use prdforge_core::LayoutPage;

use crate::{Persona, ProductBrief, RequestData, RewriteAction};

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else.";

fn serialize_brief(brief: &ProductBrief) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("PRODUCT: ");
    out.push_str(&brief.name);
    out.push('\n');
    for (label, value) in [
        ("DESCRIPTION", &brief.description),
        ("VISION", &brief.vision),
        ("AUDIENCE", &brief.target_audience),
        ("PROBLEM", &brief.problem),
    ] {
        if !value.trim().is_empty() {
            out.push_str(label);
            out.push_str(": ");
            out.push_str(value.trim());
            out.push('\n');
        }
    }
    out
}

pub fn personas(brief: &ProductBrief) -> (String, String) {
    let system = format!(
        "You are a product researcher. Propose three to five distinct customer personas for the \
product described by the user. Score each persona 0-100 for how central it is to the product's \
success.\n\
Shape: {{\"personas\":[{{\"name\":\"\",\"role\":\"\",\"description\":\"\",\"goals\":[\"\"],\
\"painPoints\":[\"\"],\"score\":0}}]}}\n{JSON_ONLY}"
    );
    (system, serialize_brief(brief))
}

pub fn features(brief: &ProductBrief, personas: &[Persona]) -> (String, String) {
    let system = format!(
        "You are a product manager. List the features the product needs for its first release. \
Names are short noun phrases; priority is one of high, medium, low.\n\
Shape: {{\"features\":[{{\"name\":\"\",\"description\":\"\",\"priority\":\"medium\"}}]}}\n{JSON_ONLY}"
    );
    let mut user = serialize_brief(brief);
    if !personas.is_empty() {
        user.push_str("PERSONAS:\n");
        for p in personas {
            user.push_str("- ");
            user.push_str(&p.name);
            if !p.role.is_empty() {
                user.push_str(" (");
                user.push_str(&p.role);
                user.push(')');
            }
            if !p.goals.is_empty() {
                user.push_str(" goals: ");
                user.push_str(&p.goals.join("; "));
            }
            user.push('\n');
        }
    }
    (system, user)
}

pub fn flow(brief: &ProductBrief, feature_names: &[String]) -> (String, String) {
    let system = format!(
        "You are a UX designer. Derive the screens (pages) a user moves through in this product. \
Each page lists which of the given features it exposes and describes its layout in one or two \
sentences.\n\
Shape: {{\"pages\":[{{\"name\":\"\",\"description\":\"\",\"layoutDescription\":\"\",\
\"features\":[\"\"]}}]}}\n{JSON_ONLY}"
    );
    let mut user = serialize_brief(brief);
    if !feature_names.is_empty() {
        user.push_str("FEATURES:\n");
        for f in feature_names {
            user.push_str("- ");
            user.push_str(f);
            user.push('\n');
        }
    }
    (system, user)
}

pub fn flow_layout(pages: &[LayoutPage]) -> (String, String) {
    let system = format!(
        "You are a UX designer arranging a user-flow diagram. Keep every page id exactly as given. \
Add directed connections for the transitions a user makes between pages. Place pages left to \
right in flow order, at least 250 apart horizontally or 150 apart vertically.\n\
Shape: {{\"pages\":[{{\"id\":\"\",\"name\":\"\",\"description\":\"\",\"layoutDescription\":\"\",\
\"features\":[\"\"],\"position\":{{\"x\":0,\"y\":0}}}}],\
\"connections\":[{{\"source\":\"<page id>\",\"target\":\"<page id>\"}}]}}\n{JSON_ONLY}"
    );
    let mut user = String::from("PAGES:\n");
    for page in pages {
        user.push('[');
        user.push_str(&page.id);
        user.push_str("] \"");
        user.push_str(&page.name);
        user.push('"');
        if !page.description.is_empty() {
            user.push_str(" | ");
            user.push_str(&page.description);
        }
        if !page.features.is_empty() {
            user.push_str(" features=");
            user.push_str(&page.features.join(", "));
        }
        user.push('\n');
    }
    (system, user)
}

pub fn rewrite(data: &RequestData) -> (String, String) {
    let instruction = match data.action.unwrap_or(RewriteAction::Improve) {
        RewriteAction::Improve => "Improve clarity and flow while keeping the meaning.",
        RewriteAction::Shorten => "Make it noticeably shorter without losing key points.",
        RewriteAction::Expand => "Expand it with concrete detail.",
        RewriteAction::Formalize => "Rewrite it in a formal, professional tone.",
        RewriteAction::Simplify => "Rewrite it in plain language.",
    };
    let system = format!(
        "You edit text for product requirement documents. {instruction}\n\
Shape: {{\"text\":\"\"}}\n{JSON_ONLY}"
    );
    let mut user = String::new();
    if let Some(context) = data.context.as_deref().filter(|c| !c.trim().is_empty()) {
        user.push_str("CONTEXT: ");
        user.push_str(context);
        user.push('\n');
    }
    user.push_str("TEXT:\n");
    user.push_str(data.text.as_deref().unwrap_or_default());
    (system, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brief_skips_empty_sections() {
        let brief = ProductBrief {
            name: "Tally".into(),
            vision: "Shared budgets".into(),
            ..Default::default()
        };
        let text = serialize_brief(&brief);
        assert!(text.contains("VISION: Shared budgets"));
        assert!(!text.contains("AUDIENCE"));
    }

    #[test]
    fn layout_prompt_lists_page_ids() {
        let pages = vec![LayoutPage {
            id: "tmp-1".into(),
            name: "Sign up".into(),
            description: String::new(),
            layout_description: String::new(),
            features: vec!["OAuth".into()],
            position: None,
        }];
        let (system, user) = flow_layout(&pages);
        assert!(system.contains("\"connections\""));
        assert!(user.contains("[tmp-1] \"Sign up\" features=OAuth"));
    }
}
