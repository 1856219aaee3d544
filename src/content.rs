//! Customization-driven content generation.
//!
//! Two artifacts are derived from the customer's customization record:
//! the `agents.md` metadata file committed into the provisioned
//! repository, and the task prompt handed to the agent session. The
//! orchestrator treats the generator as an opaque collaborator behind
//! [`ContentGenerator`].

use serde::{Deserialize, Serialize};

/// Path of the metadata file written into the provisioned repository.
pub const METADATA_PATH: &str = "agents.md";

pub const METADATA_COMMIT_MESSAGE: &str = "Add agents.md with customization details";

/// Customer-supplied customization captured by the intake form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomizationRecord {
    pub company_name: String,
    pub industry: String,
    pub use_case: String,
    pub customer_scenario: String,
    pub additional_requirements: String,
    #[serde(default)]
    pub brand_theme: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
}

/// The template being provisioned, as far as content generation cares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCard {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Web URL of the source template repository.
    pub source_url: String,
}

/// Produces the repository metadata file and the agent task prompt.
pub trait ContentGenerator: Send + Sync {
    fn metadata_file(&self, card: &TemplateCard, customization: &CustomizationRecord) -> String;

    fn task_prompt(
        &self,
        card: &TemplateCard,
        customization: &CustomizationRecord,
        repo_url: &str,
    ) -> String;
}

/// Default markdown generator.
pub struct TemplateContent;

impl ContentGenerator for TemplateContent {
    fn metadata_file(&self, card: &TemplateCard, customization: &CustomizationRecord) -> String {
        let mut out = format!("# {}\n", card.title);
        if let Some(description) = &card.description {
            out.push_str(&format!("\n{}\n", description));
        }
        out.push_str(&format!(
            "\n- **Company**: {}\n\
             - **Industry**: {}\n\
             - **Use Case**: {}\n",
            customization.company_name, customization.industry, customization.use_case
        ));
        if let Some(theme) = &customization.brand_theme {
            out.push_str(&format!("- **Brand Theme**: {}\n", theme));
        }
        if let Some(color) = &customization.primary_color {
            out.push_str(&format!("- **Primary Color**: {}\n", color));
        }
        out.push_str(&format!(
            "\n## Scenario\n\n{}\n\n## Additional Requirements\n\n{}\n\n{}\n",
            customization.customer_scenario,
            customization.additional_requirements,
            card.source_url
        ));
        out
    }

    fn task_prompt(
        &self,
        card: &TemplateCard,
        customization: &CustomizationRecord,
        repo_url: &str,
    ) -> String {
        let mut prompt = format!(
            "Implement the following customization for the {} template.\n\n\
             Customer: {}\n\
             Industry: {}\n\
             Use Case: {}\n",
            card.title, customization.company_name, customization.industry, customization.use_case
        );
        if let Some(theme) = &customization.brand_theme {
            prompt.push_str(&format!("Brand Theme: {}\n", theme));
        }
        if let Some(color) = &customization.primary_color {
            prompt.push_str(&format!("Primary Color: {}\n", color));
        }
        prompt.push_str(&format!(
            "\nScenario:\n{}\n\n\
             Additional Requirements:\n{}\n\n\
             Repository to work in (provisioned from the template):\n{}\n\n\
             Tasks:\n\
             - Review the repository and {} for context.\n\
             - Apply the customizations and open a pull request.\n\
             - Document the changes in the PR description.",
            customization.customer_scenario,
            customization.additional_requirements,
            repo_url,
            METADATA_PATH
        ));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> TemplateCard {
        TemplateCard {
            title: "Retail Chat Starter".into(),
            description: Some("A chat starter kit.".into()),
            source_url: "https://github.com/octo/template".into(),
        }
    }

    fn customization() -> CustomizationRecord {
        CustomizationRecord {
            company_name: "Acme Corp".into(),
            industry: "Retail".into(),
            use_case: "Customer support".into(),
            customer_scenario: "Acme wants a support bot.".into(),
            additional_requirements: "Use the existing design system.".into(),
            brand_theme: None,
            primary_color: None,
        }
    }

    #[test]
    fn test_metadata_file_contains_customization() {
        let md = TemplateContent.metadata_file(&card(), &customization());
        assert!(md.starts_with("# Retail Chat Starter\n"));
        assert!(md.contains("A chat starter kit."));
        assert!(md.contains("- **Company**: Acme Corp"));
        assert!(md.contains("## Scenario\n\nAcme wants a support bot."));
        assert!(md.contains("https://github.com/octo/template"));
        // Optional branding lines are omitted entirely when unset.
        assert!(!md.contains("Brand Theme"));
        assert!(!md.contains("Primary Color"));
    }

    #[test]
    fn test_metadata_file_includes_branding_when_present() {
        let mut custom = customization();
        custom.brand_theme = Some("Minimal dark".into());
        custom.primary_color = Some("#ff6600".into());
        let md = TemplateContent.metadata_file(&card(), &custom);
        assert!(md.contains("- **Brand Theme**: Minimal dark"));
        assert!(md.contains("- **Primary Color**: #ff6600"));
    }

    #[test]
    fn test_task_prompt_points_at_provisioned_repo() {
        let prompt = TemplateContent.task_prompt(
            &card(),
            &customization(),
            "https://github.com/alice/retail-chat-acme-corp",
        );
        assert!(prompt.contains("Retail Chat Starter template"));
        assert!(prompt.contains("https://github.com/alice/retail-chat-acme-corp"));
        assert!(prompt.contains("Review the repository and agents.md"));
        assert!(prompt.contains("open a pull request"));
    }
}
