//! Prompt templates for generated columns.
//!
//! A column's `gen_config.prompt` references other columns of the same row as
//! `${column}`. Templates are resolved before a session claims its cells.

use crate::error::ApiError;
use crate::session::CellPrompt;
use crate::table::{Column, Row};
use crate::types::{CellAddress, ColumnId};

/// Column ids referenced by a template, in order of appearance.
pub fn referenced_columns(template: &str) -> Result<Vec<ColumnId>, ApiError> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ApiError::TemplateError(format!(
                "Unterminated placeholder in template: {}",
                template
            ))
        })?;
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(ApiError::TemplateError(
                "Empty placeholder in template".to_string(),
            ));
        }
        names.push(name.to_string());
        rest = &after[end + 1..];
    }
    Ok(names)
}

/// Substitute `${column}` placeholders with the row's values.
///
/// Unknown columns are errors; known columns without a cell resolve to "".
pub fn render(template: &str, row: &Row, columns: &[Column]) -> Result<String, ApiError> {
    for name in referenced_columns(template)? {
        if !columns.iter().any(|c| c.id == name) {
            return Err(ApiError::TemplateError(format!(
                "Template references unknown column '{}'",
                name
            )));
        }
    }

    // Single pass so substituted values are never re-expanded.
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        rendered.push_str(row.value(after[..end].trim()).unwrap_or(""));
        rest = &after[end + 1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

/// Resolve everything the backend needs to generate `column` for `row`.
pub fn build_cell_prompt(
    column: &Column,
    row: &Row,
    columns: &[Column],
) -> Result<CellPrompt, ApiError> {
    let gen_config = column.gen_config.as_ref().ok_or_else(|| {
        ApiError::InvalidRequest(format!("Column {} is not a generated column", column.id))
    })?;

    let user_prompt = render(&gen_config.prompt, row, columns)?;
    let system_prompt = gen_config
        .system_prompt
        .as_deref()
        .map(|s| render(s, row, columns))
        .transpose()?;
    let rag_params = match &gen_config.rag_params {
        Some(params) => {
            let mut params = params.clone();
            params.search_query = params
                .search_query
                .as_deref()
                .map(|q| render(q, row, columns))
                .transpose()?;
            Some(params)
        }
        None => None,
    };

    Ok(CellPrompt {
        address: CellAddress::new(row.id.clone(), column.id.clone()),
        model: gen_config.model.clone(),
        system_prompt,
        user_prompt,
        temperature: gen_config.temperature,
        max_tokens: gen_config.max_tokens,
        rag_params,
    })
}
