use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use chrono::NaiveDate;
use serde::Serialize;

use crate::{constants::SHOPPING_LIST_FILENAME, schema::Uuid};

/*
Shopping list report

Shopping list compiled: 16-10-2026
Products:
1. Beetroot — 600 g
2. Salt — 10 g
Recipes this list was compiled for:
1. Borscht
*/

/// One ingredient line of one recipe in a user's cart.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CartIngredient {
    pub recipe_id: Uuid,
    pub ingredient_id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShoppingListItem {
    pub ingredient_id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub total_amount: i64,
}

/// Sums amounts per ingredient across every recipe in the cart.
pub fn aggregate_ingredients<I>(rows: I) -> Vec<ShoppingListItem>
where
    I: IntoIterator<Item = CartIngredient>,
{
    let mut totals: BTreeMap<Uuid, ShoppingListItem> = BTreeMap::new();

    for row in rows {
        totals
            .entry(row.ingredient_id)
            .and_modify(|item| item.total_amount += i64::from(row.amount))
            .or_insert_with(|| ShoppingListItem {
                ingredient_id: row.ingredient_id,
                name: row.name.clone(),
                measurement_unit: row.measurement_unit.clone(),
                total_amount: i64::from(row.amount),
            });
    }

    let mut items: Vec<ShoppingListItem> = totals.into_values().collect();
    items.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.measurement_unit.cmp(&b.measurement_unit))
            .then_with(|| a.ingredient_id.cmp(&b.ingredient_id))
    });
    items
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingList {
    pub compiled_on: NaiveDate,
    pub items: Vec<ShoppingListItem>,
    pub recipes: Vec<String>,
}

impl ShoppingList {
    pub fn new(compiled_on: NaiveDate, rows: Vec<CartIngredient>, recipes: Vec<String>) -> Self {
        Self {
            compiled_on,
            items: aggregate_ingredients(rows),
            recipes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn into_file(self) -> ShoppingListFile {
        ShoppingListFile {
            filename: SHOPPING_LIST_FILENAME,
            content: self.to_string(),
        }
    }
}

/// Rendered list plus the name it is downloaded as.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShoppingListFile {
    pub filename: &'static str,
    pub content: String,
}

/// Upper-cases the first letter and lower-cases the rest.
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

impl Display for ShoppingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec![
            format!(
                "Shopping list compiled: {}",
                self.compiled_on.format("%d-%m-%Y")
            ),
            String::from("Products:"),
        ];

        lines.extend(self.items.iter().enumerate().map(|(i, item)| {
            format!(
                "{}. {} — {} {}",
                i + 1,
                capitalize(&item.name),
                item.total_amount,
                item.measurement_unit
            )
        }));

        lines.push(String::from("Recipes this list was compiled for:"));
        lines.extend(
            self.recipes
                .iter()
                .enumerate()
                .map(|(i, recipe)| format!("{}. {}", i + 1, recipe)),
        );

        write!(f, "{}", lines.join("\n"))
    }
}
