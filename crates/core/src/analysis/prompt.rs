//! Prompt composition.
//!
//! Two templates: a compact one for very large pseudocode (no binary
//! metadata, core functionality only) and the standard one with binary
//! information and a full analysis checklist. Both demand a single JSON
//! object with `comment`, `function_name`, `variables` and `security_role`.

use crate::model::{BinaryInfo, FunctionAddress};

/// Pseudocode longer than this (in characters) uses the large template.
pub const LARGE_FUNCTION_THRESHOLD: usize = 400_000;

/// System message sent with every request.
pub const SYSTEM_PROMPT: &str = "You are an assistant specialised in reverse engineering, code \
analysis and code readability. Always answer with a single valid JSON object in exactly the \
format the user asks for.";

const JSON_SHAPE: &str = r#"{
  "comment": "What the function does, based on its code and calling context",
  "function_name": "descriptiveName",
  "variables": [
    {"original_name": "v1", "new_name": "betterName"},
    {"original_name": "a1", "new_name": "betterName"}
  ],
  "security_role": ""
}"#;

pub fn is_large(decompiled: &str, threshold: usize) -> bool {
    decompiled.chars().count() > threshold
}

/// Compose the analysis prompt for one function.
pub fn compose_prompt(
    address: FunctionAddress,
    digest: &str,
    decompiled: &str,
    binary: &BinaryInfo,
    threshold: usize,
) -> String {
    if is_large(decompiled, threshold) {
        large_prompt(address, digest, decompiled)
    } else {
        standard_prompt(address, digest, decompiled, binary)
    }
}

fn large_prompt(address: FunctionAddress, digest: &str, decompiled: &str) -> String {
    format!(
        "Analyze the following decompiled pseudocode of the function at {address}.\n\
\n\
This is a LARGE FUNCTION. Focus on its core functionality only.\n\
\n\
Function Context:\n\
{digest}\n\
Decompiled Pseudocode:\n\
{decompiled}\n\
\n\
Work out what the function does from its code and its position in the call graph. In particular:\n\
1. Which functions call it (see the \"Called by:\" section)\n\
2. Which functions it calls (see the \"Calls:\" section)\n\
3. Any meaningful string or data references\n\
\n\
If the surrounding functions deal with security, attestation or protection, consider whether this function contributes to that.\n\
\n\
IMPORTANT: Respond ONLY with a valid JSON object in this format:\n\
{JSON_SHAPE}\n\
\n\
Rename as many variables as possible to make the code readable; there is no limit on the number of renamed variables.\n"
    )
}

fn standard_prompt(
    address: FunctionAddress,
    digest: &str,
    decompiled: &str,
    binary: &BinaryInfo,
) -> String {
    let ios = if binary.is_ios { "Yes" } else { "Likely not" };
    format!(
        "Analyze the following decompiled pseudocode of the function at {address}.\n\
\n\
Binary Information:\n\
- Filename: {filename}\n\
- Architecture: {processor} {bitness}\n\
- iOS Binary: {ios}\n\
\n\
Function Context:\n\
{digest}\n\
Decompiled Pseudocode:\n\
{decompiled}\n\
\n\
Analyze the pseudocode thoroughly, considering:\n\
1. The function's actual code logic\n\
2. Functions that call it (see the \"Called by:\" section)\n\
3. Functions it calls (see the \"Calls:\" section)\n\
4. Any string or data references\n\
\n\
Names of callers and callees are often the best clue to a function's purpose.\n\
\n\
Provide:\n\
1. A clear explanation of what the function does\n\
2. A better function name describing its purpose\n\
3. Better names for its variables (decompiler defaults look like v1, a1, ...)\n\
\n\
IMPORTANT: Your response MUST be a valid JSON object in this format:\n\
{JSON_SHAPE}\n\
\n\
Fill in security_role ONLY if the function's relationship to security is unambiguous from its code or context.\n\
\n\
DO NOT include any explanatory text outside of the JSON object.\n",
        filename = binary.filename,
        processor = binary.processor,
        bitness = binary.bitness(),
    )
}

/// Follow-up prompt asking the model to restate a malformed answer as JSON.
pub fn reformat_prompt(previous_reply: &str) -> String {
    format!(
        "Your previous answer was not a valid JSON object:\n\
\n\
{previous_reply}\n\
\n\
Restate it as a single JSON object with this structure:\n\
{JSON_SHAPE}\n\
\n\
Output ONLY the JSON object, with no extra text, explanation or markdown.\n"
    )
}
