//! REST paths of the marketplace backend.

pub const SIGN_IN: &str = "/auth/sign-in";
pub const SIGN_UP: &str = "/auth/sign-up";
pub const SIGN_OUT: &str = "/auth/sign-out";
pub const REFRESH_TOKEN: &str = "/auth/refresh-token";
pub const PROFILE: &str = "/auth/profile";
pub const UPDATE_PROFILE: &str = "/auth/update-profile";
pub const UPDATE_AVATAR: &str = "/auth/update-avatar";
pub const VERIFY_TOKEN: &str = "/auth/verify-token";

pub const LATEST_PRODUCTS: &str = "/product/latest";
pub const LISTINGS: &str = "/product/listings";
pub const CREATE_LISTING: &str = "/product/list";
pub const SEARCH: &str = "/product/search";
pub const ASK_AI: &str = "/product/ask-ai";

pub fn products_by_category(category: &str) -> String {
    format!("/product/by-category/{}", encode_segment(category))
}

pub fn product_detail(id: &str) -> String {
    format!("/product/detail/{}", encode_segment(id))
}

/// Update (PATCH) and delete (DELETE) share this path.
pub fn product(id: &str) -> String {
    format!("/product/{}", encode_segment(id))
}

pub fn product_image(product_id: &str, image_id: &str) -> String {
    format!(
        "/product/image/{}/{}",
        encode_segment(product_id),
        encode_segment(image_id)
    )
}

/// Percent-encode a single path segment.
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_paths_encode_segments() {
        assert_eq!(products_by_category("Electronics"), "/product/by-category/Electronics");
        assert_eq!(
            products_by_category("Home & Garden"),
            "/product/by-category/Home%20%26%20Garden"
        );
        assert_eq!(product_image("p1", "img/2"), "/product/image/p1/img%2F2");
        assert_eq!(product("abc"), "/product/abc");
    }
}
