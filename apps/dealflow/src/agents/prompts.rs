// Prompt templates for advisory text generation
//
// Prompts are versioned so a routing hint can be traced back to the exact
// wording that produced it.

use std::collections::HashMap;

/// Prompt template structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub system: String,
    pub user_template: String,
}

impl PromptTemplate {
    /// Render the user template, replacing each `{{name}}` with its value
    ///
    /// Placeholders without a value are left in place.
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let mut rendered = String::with_capacity(self.user_template.len());
        let mut rest = self.user_template.as_str();

        while let Some(start) = rest.find("{{") {
            rendered.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            match after_open.find("}}") {
                Some(end) => {
                    let key = after_open[..end].trim();
                    match variables.get(key) {
                        Some(value) => rendered.push_str(value),
                        None => rendered.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after_open[end + 2..];
                }
                None => {
                    rendered.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }

    /// Identifier recorded alongside generated output
    pub fn reference(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

pub mod library {
    use super::PromptTemplate;

    pub fn routing_advice() -> PromptTemplate {
        PromptTemplate {
            name: "routing_advice".to_string(),
            version: "1.0.0".to_string(),
            system: "You are the supervisor of a real-estate acquisition team. \
                     Reply with exactly one worker name and nothing else."
                .to_string(),
            user_template: "Market: {{market}}\n\
                            Available capital: {{capital}}\n\
                            Deals by status: {{deals}}\n\
                            Eligible workers: {{candidates}}\n\n\
                            Which worker should act next?"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_variables() {
        let template = PromptTemplate {
            name: "t".to_string(),
            version: "1".to_string(),
            system: String::new(),
            user_template: "Capital {{ capital }} in {{market}}".to_string(),
        };
        let vars = HashMap::from([
            ("capital".to_string(), "500000".to_string()),
            ("market".to_string(), "Austin".to_string()),
        ]);

        assert_eq!(template.render(&vars), "Capital 500000 in Austin");
    }

    #[test]
    fn render_keeps_unknown_and_unclosed_placeholders() {
        let template = PromptTemplate {
            name: "t".to_string(),
            version: "1".to_string(),
            system: String::new(),
            user_template: "{{missing}} and {{open".to_string(),
        };

        assert_eq!(template.render(&HashMap::new()), "{{missing}} and {{open");
    }

    #[test]
    fn routing_prompt_is_versioned() {
        assert_eq!(library::routing_advice().reference(), "routing_advice@1.0.0");
    }
}
