//! Chinese to English term tables for accessory vocabulary.
//!
//! Analyses arrive in whichever language the vision model answered in, while
//! embedding and generation work best on English text. Lookups fall back to
//! the trimmed source term, so an unknown word is never dropped.

pub const ELEMENT_TERMS: &[(&str, &str)] = &[
    ("贝壳", "shell"),
    ("海星", "starfish"),
    ("珍珠", "pearl"),
    ("水晶", "crystal"),
    ("玛瑙", "agate"),
    ("流苏", "tassel"),
    ("编织绳", "woven cord"),
    ("毛线球", "yarn ball"),
    ("玻璃珠", "glass bead"),
    ("管珠", "tube bead"),
    ("隔珠", "spacer bead"),
    ("珠子", "bead"),
    ("吊坠", "pendant"),
    ("天然石", "natural stone"),
    ("亚克力", "acrylic charm"),
    ("树脂", "resin charm"),
    ("蝴蝶", "butterfly"),
    ("心形", "heart"),
    ("星星", "star"),
    ("月亮", "moon"),
    ("花朵", "flower"),
    ("叶子", "leaf"),
    ("海豚", "dolphin"),
    ("海马", "seahorse"),
    ("龙虾扣", "lobster clasp"),
    ("钥匙环", "keyring"),
    ("登山扣", "carabiner"),
    ("旋转扣", "swivel clasp"),
    ("跳环", "jump ring"),
    ("T针", "T-pin"),
    ("9针", "eye pin"),
    ("耳钩", "ear hook"),
    ("延长链", "extension chain"),
    ("链条", "chain"),
    ("手机挂绳", "phone lanyard"),
    ("吸盘", "suction cup"),
];

pub const COLOR_TERMS: &[(&str, &str)] = &[
    ("白色", "white"),
    ("粉色", "pink"),
    ("蓝色", "blue"),
    ("绿色", "green"),
    ("红色", "red"),
    ("紫色", "purple"),
    ("金色", "gold"),
    ("银色", "silver"),
    ("古铜色", "bronze"),
    ("玫瑰金", "rose gold"),
    ("薄荷绿", "mint green"),
    ("天蓝色", "sky blue"),
    ("海蓝色", "ocean blue"),
    ("透明", "transparent"),
    ("渐变", "gradient"),
    ("彩虹", "rainbow"),
    ("米白", "cream"),
    ("奶白", "milky white"),
    ("珊瑚粉", "coral pink"),
];

pub const MATERIAL_TERMS: &[(&str, &str)] = &[
    ("金属", "metal"),
    ("合金", "alloy"),
    ("不锈钢", "stainless steel"),
    ("铜", "copper"),
    ("黄铜", "brass"),
    ("皮革", "leather"),
    ("棉绳", "cotton cord"),
];

pub const STYLE_TERMS: &[(&str, &str)] = &[
    ("海洋风", "ocean style"),
    ("波西米亚", "bohemian"),
    ("民族风", "ethnic"),
    ("甜美", "sweet"),
    ("可爱", "cute"),
    ("少女系", "girly"),
    ("简约", "minimalist"),
    ("复古", "vintage"),
    ("典雅", "elegant"),
    ("自然", "natural"),
    ("清新", "fresh"),
    ("梦幻", "dreamy"),
    ("星空", "starry"),
    ("童趣", "playful"),
    ("糖果色", "candy color"),
];

fn lookup<'a>(table: &[(&str, &'static str)], term: &'a str) -> &'a str {
    let key = term.trim();
    table
        .iter()
        .find(|(source, _)| *source == key)
        .map(|(_, english)| *english)
        .unwrap_or(key)
}

pub fn element_term(term: &str) -> &str {
    lookup(ELEMENT_TERMS, term)
}

pub fn color_term(term: &str) -> &str {
    lookup(COLOR_TERMS, term)
}

/// Hardware materials are usually described by finish colour ("银色"),
/// so the colour table is consulted after the material table.
pub fn material_term(term: &str) -> &str {
    let key = term.trim();
    let material = lookup(MATERIAL_TERMS, key);
    if material != key {
        return material;
    }
    lookup(COLOR_TERMS, key)
}

pub fn style_term(term: &str) -> &str {
    lookup(STYLE_TERMS, term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_terms_translate() {
        assert_eq!(element_term("龙虾扣"), "lobster clasp");
        assert_eq!(color_term(" 珊瑚粉 "), "coral pink");
        assert_eq!(material_term("银色"), "silver");
        assert_eq!(material_term("不锈钢"), "stainless steel");
        assert_eq!(style_term("少女系"), "girly");
    }

    #[test]
    fn unknown_terms_pass_through_trimmed() {
        assert_eq!(element_term(" resin bow "), "resin bow");
        assert_eq!(color_term("teal"), "teal");
        assert_eq!(style_term("夏日"), "夏日");
    }
}
