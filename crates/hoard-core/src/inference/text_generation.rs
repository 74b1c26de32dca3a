//! text-generation

use crate::domain::{GeneratedText, HoardError, TextGenerationParams};
use crate::ports::{CausalLm, GenerationConfig, Tokenizer};

pub fn generate(
    tokenizer: &dyn Tokenizer,
    model: &dyn CausalLm,
    pad_token_id: Option<u32>,
    prompt: &str,
    params: &TextGenerationParams,
) -> Result<GeneratedText, HoardError> {
    if prompt.trim().is_empty() {
        return Err(HoardError::invalid_input("text input must not be empty"));
    }

    let input_ids = tokenizer.encode(prompt, None)?;
    let config = GenerationConfig {
        max_new_tokens: params.max_length as usize,
        temperature: params.temperature,
        top_p: params.top_p,
        top_k: params.top_k as usize,
        do_sample: params.do_sample,
        pad_token_id,
        eos_token_id: tokenizer.eos_token_id(),
    };

    let output_ids = model.generate(&input_ids, &config)?;
    let full_text = tokenizer.decode(&output_ids, true)?;

    Ok(GeneratedText {
        generated_text: strip_prompt(&full_text, prompt),
        full_text,
    })
}

/// decode 結果が prompt で始まっていれば取り除いて trim、そうでなければそのまま
pub fn strip_prompt(full_text: &str, prompt: &str) -> String {
    match full_text.strip_prefix(prompt) {
        Some(rest) => rest.trim().to_string(),
        None => full_text.to_string(),
    }
}
