use std::env;

/// Environment inputs, spec.md §6.
pub struct Config {
    pub data_dir: String,
    pub default_code_model: String,
    pub default_llm_model: String,
    pub default_llm_api_base: String,
    pub llm_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Config {
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            default_code_model: env::var("DEFAULT_CODE_MODEL")
                .unwrap_or_else(|_| "javascript".to_string()),
            default_llm_model: env::var("DEFAULT_LLM_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            default_llm_api_base: env::var("DEFAULT_LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_api_key: env::var("LLM_API_KEY").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        std::env::remove_var("DATA_DIR");
        std::env::remove_var("DEFAULT_LLM_API_BASE");
        let cfg = Config::from_env();
        assert_eq!(cfg.data_dir, "./data");
        assert_eq!(cfg.default_llm_api_base, "https://api.openai.com/v1");
    }
}
