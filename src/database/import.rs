use crate::{
    constants::INGREDIENT_FIELD_LENGTH, error::ValidationError, schema::NewIngredient,
};

/*
Ingredient data files

CSV, no header, two columns; quote fields holding commas:
    абрикосовое варенье,г
    "Salt, sea","g, coarse"

JSON:
    [{"name": "абрикосовое варенье", "measurement_unit": "г"}]
*/

fn check_ingredient(line: usize, item: NewIngredient) -> Result<NewIngredient, ValidationError> {
    for (field, value) in [("name", &item.name), ("measurement_unit", &item.measurement_unit)] {
        if value.is_empty() {
            return Err(ValidationError::InvalidImportLine {
                line,
                info: format!("empty {field}"),
            });
        }
        if value.chars().count() > INGREDIENT_FIELD_LENGTH {
            return Err(ValidationError::InvalidImportLine {
                line,
                info: format!("{field} longer than {INGREDIENT_FIELD_LENGTH} characters"),
            });
        }
    }
    Ok(item)
}

fn line_of(position: Option<&csv::Position>) -> usize {
    position.map(|p| p.line() as usize).unwrap_or(0)
}

pub fn parse_ingredient_csv(text: &str) -> Result<Vec<NewIngredient>, ValidationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut items = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ValidationError::InvalidImportLine {
            line: line_of(e.position()),
            info: e.to_string(),
        })?;
        let line = line_of(record.position());

        match (record.len(), record.get(0), record.get(1)) {
            (1, Some(""), _) => continue,
            (2, Some(name), Some(unit)) => items.push(check_ingredient(
                line,
                NewIngredient {
                    name: name.to_string(),
                    measurement_unit: unit.to_string(),
                },
            )?),
            _ => {
                return Err(ValidationError::InvalidImportLine {
                    line,
                    info: String::from("expected 'name,unit'"),
                })
            }
        }
    }
    Ok(items)
}

pub fn parse_ingredient_json(text: &str) -> Result<Vec<NewIngredient>, ValidationError> {
    let items: Vec<NewIngredient> =
        serde_json::from_str(text).map_err(|e| ValidationError::InvalidImportLine {
            line: e.line(),
            info: e.to_string(),
        })?;

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            check_ingredient(
                i + 1,
                NewIngredient {
                    name: item.name.trim().to_string(),
                    measurement_unit: item.measurement_unit.trim().to_string(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingredient(name: &str, unit: &str) -> NewIngredient {
        NewIngredient {
            name: name.to_string(),
            measurement_unit: unit.to_string(),
        }
    }

    #[test]
    fn csv_rows() {
        let items = parse_ingredient_csv(
            "абрикосовое варенье,г\n\n\"Salt, sea\",g\r\nbaking soda , tsp\n",
        )
        .unwrap();

        assert_eq!(
            items,
            vec![
                ingredient("абрикосовое варенье", "г"),
                ingredient("Salt, sea", "g"),
                ingredient("baking soda", "tsp"),
            ]
        );
    }

    #[test]
    fn csv_quoted_fields_keep_commas() {
        let items =
            parse_ingredient_csv("\"Salt, sea\",\"g, coarse\"\n\"Say \"\"cheese\"\"\",pcs\n")
                .unwrap();

        assert_eq!(
            items,
            vec![
                ingredient("Salt, sea", "g, coarse"),
                ingredient("Say \"cheese\"", "pcs"),
            ]
        );
        assert!(parse_ingredient_csv("flour,g,extra\n").is_err());
    }

    #[test]
    fn csv_reports_line_numbers() {
        assert_eq!(
            parse_ingredient_csv("flour,g\nsugar\n"),
            Err(ValidationError::InvalidImportLine {
                line: 2,
                info: "expected 'name,unit'".to_string()
            })
        );
        assert!(matches!(
            parse_ingredient_csv("flour,\n"),
            Err(ValidationError::InvalidImportLine { line: 1, .. })
        ));
    }

    #[test]
    fn json_list() {
        let items = parse_ingredient_json(
            r#"[{"name": " mint ", "measurement_unit": "leaf"}, {"name": "lime", "measurement_unit": "pcs"}]"#,
        )
        .unwrap();

        assert_eq!(items, vec![ingredient("mint", "leaf"), ingredient("lime", "pcs")]);
        assert!(parse_ingredient_json("{}").is_err());
    }
}
