//! Default table, key and pivot names derived from model names.

use heck::ToSnakeCase;

/// English plural of a snake_case word, good enough for table names.
pub fn plural(word: &str) -> String {
    if word.ends_with('y')
        && !word.ends_with("ay")
        && !word.ends_with("ey")
        && !word.ends_with("oy")
        && !word.ends_with("uy")
    {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// `BlogPost` → `blog_posts`.
pub fn table_name(model: &str) -> String {
    let snake = model.to_snake_case();
    match snake.rsplit_once('_') {
        Some((head, last)) => format!("{head}_{}", plural(last)),
        None => plural(&snake),
    }
}

/// Column on other tables pointing at `model`: `BlogPost` + `id` → `blog_post_id`.
pub fn foreign_key(model: &str, key: &str) -> String {
    format!("{}_{key}", model.to_snake_case())
}

/// Pivot table joining two models: singular snake names in alphabetical order.
pub fn pivot_table(a: &str, b: &str) -> String {
    let mut names = [a.to_snake_case(), b.to_snake_case()];
    names.sort();
    names.join("_")
}

pub fn morph_type(name: &str) -> String {
    format!("{}_type", name.to_snake_case())
}

pub fn morph_id(name: &str) -> String {
    format!("{}_id", name.to_snake_case())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventions() {
        assert_eq!(table_name("User"), "users");
        assert_eq!(table_name("BlogPost"), "blog_posts");
        assert_eq!(table_name("Category"), "categories");
        assert_eq!(table_name("Address"), "addresses");
        assert_eq!(foreign_key("BlogPost", "id"), "blog_post_id");
        assert_eq!(pivot_table("User", "Role"), "role_user");
        assert_eq!(morph_type("commentable"), "commentable_type");
    }
}
