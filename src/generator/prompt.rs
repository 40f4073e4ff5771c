use crate::generator::Language;

pub fn build_system_prompt(language: Language) -> String {
    format!(
        "You are a helpful coding assistant that generates accurate {} code.",
        language.display_name()
    )
}

pub fn build_user_prompt(description: &str, language: Language) -> String {
    format!(
        r#"Convert the following natural language description into {lang} code.

## Requirements

1. The code must be concise, well-commented, and directly executable as a script
2. Print results to standard output so they can be observed
3. Use only the {lang} standard library
4. If the description is unclear, make reasonable assumptions and state each one in a comment

Return a single fenced code block tagged `{tag}`.

Description: "{description}""#,
        lang = language.display_name(),
        tag = language.name(),
        description = description
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_language_and_text() {
        let prompt = build_user_prompt("add two numbers", Language::Python);
        assert!(prompt.contains("Python code"));
        assert!(prompt.contains("\"add two numbers\""));
        assert!(prompt.contains("`python`"));
        assert!(build_system_prompt(Language::Python).contains("Python"));
    }
}
