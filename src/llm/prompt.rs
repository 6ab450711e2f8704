use crate::types::Listing;

/// Appraisal instructions for one listing. The reply is expected to be a single
/// `$XX.XX` token, but nothing downstream relies on that.
pub fn appraisal_prompt(listing: &Listing, with_image: bool) -> String {
    let category = listing
        .category
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or("Unknown");

    let image_section = if with_image {
        "\nA photo of the item is attached. Use it to judge condition, visible wear or damage, \
         brand authenticity, notable features, and material quality.\n"
    } else {
        ""
    };

    format!(
        "You appraise secondhand goods for resale.\n\
         \n\
         ITEM\n\
         - Product name: {name}\n\
         - Category: {category}\n\
         - Shipping cost: ${shipping:.2}\n\
         {image_section}\n\
         TASK\n\
         Estimate the price this item would realistically sell for on a resale marketplace such as eBay.\n\
         - Give a precise figure rather than a round number.\n\
         - Weigh brand, condition, features, rarity and recent comparable sales.\n\
         - Lots and bulk items usually sell for less than expected.\n\
         - This estimate decides whether the item is bought. If it is not worth buying, answer $0.00.\n\
         \n\
         Reply with one dollar amount formatted like $XX.XX and nothing else. \
         If you cannot price it with confidence, reply $0.00.",
        name = listing.product_name.trim(),
        shipping = listing.shipping_price,
    )
}
