//! Prompt templates for the physiotherapy assistant.

/// General guidance request.
pub fn guidance_prompt(user: &str) -> String {
    format!(
        "As a physiotherapy AI assistant for PhysioFlow, \n        provide guidance on the following: {user}"
    )
}

/// Form analysis of a described exercise.
pub fn analysis_prompt(description: &str) -> String {
    format!(
        "As a physiotherapy expert, analyze the following \n        \
         exercise form and provide feedback: {description}\n        \n        \
         Consider:\n        \
         1. Proper joint alignment\n        \
         2. Movement range\n        \
         3. Potential compensation patterns\n        \
         4. Safety concerns\n        \n        \
         Provide detailed feedback:\n        "
    )
}

/// Remove an echoed prompt from the start of `generated` and trim.
pub fn strip_prompt(generated: &str, prompt: &str) -> String {
    generated
        .strip_prefix(prompt)
        .unwrap_or(generated)
        .trim()
        .to_string()
}
