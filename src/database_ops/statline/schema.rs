//! Declarative field mapping between remote OData property names and local
//! table columns, one static table per entity. The first entry of every
//! table is the primary key. The decoder walks these tables to know which
//! property elements to pull out of each `<entry>`, and the merge pass walks
//! them again to build column lists, so remote schema drift shows up in
//! exactly one place.

/// Semantic type a decoded text field is coerced into at record
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Int,
    Float,
}

/// One (remote property, local column, type) triple.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub remote: &'static str,
    pub column: &'static str,
    pub ty: FieldType,
}

const fn text(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec {
        remote,
        column,
        ty: FieldType::Text,
    }
}

const fn int(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec {
        remote,
        column,
        ty: FieldType::Int,
    }
}

const fn float(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec {
        remote,
        column,
        ty: FieldType::Float,
    }
}

/// The eight Statline entities this pipeline knows about: six small
/// dimension feeds fetched in one request each, and two paginated fact
/// feeds staged through parquet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Burgstaat,
    CategoryGroup,
    Geslacht,
    Leeftijd,
    Perioden,
    Regios,
    Bevolking,
    Bodemgebruik,
}

/// Dimension sync order: categorygroup first so rows referencing it by
/// foreign key land afterwards.
pub const DIMENSIONS: [EntityKind; 6] = [
    EntityKind::CategoryGroup,
    EntityKind::Burgstaat,
    EntityKind::Geslacht,
    EntityKind::Leeftijd,
    EntityKind::Perioden,
    EntityKind::Regios,
];

pub const FACTS: [EntityKind; 2] = [EntityKind::Bevolking, EntityKind::Bodemgebruik];

impl EntityKind {
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Burgstaat => "burgstaat",
            EntityKind::CategoryGroup => "categorygroup",
            EntityKind::Geslacht => "geslacht",
            EntityKind::Leeftijd => "leeftijd",
            EntityKind::Perioden => "perioden",
            EntityKind::Regios => "regios",
            EntityKind::Bevolking => "bevolking",
            EntityKind::Bodemgebruik => "bodemgebruik",
        }
    }

    /// Title-case stem used for staging file names (`Bevolking_170000.parquet`).
    pub fn file_stem(self) -> &'static str {
        match self {
            EntityKind::Burgstaat => "Burgstaat",
            EntityKind::CategoryGroup => "Categorygroup",
            EntityKind::Geslacht => "Geslacht",
            EntityKind::Leeftijd => "Leeftijd",
            EntityKind::Perioden => "Perioden",
            EntityKind::Regios => "Regios",
            EntityKind::Bevolking => "Bevolking",
            EntityKind::Bodemgebruik => "Bodemgebruik",
        }
    }

    /// Path of the feed below the OData base URL.
    pub fn remote_path(self) -> &'static str {
        match self {
            EntityKind::Burgstaat => "03759ned/BurgerlijkeStaat",
            EntityKind::CategoryGroup => "03759ned/CategoryGroups",
            EntityKind::Geslacht => "03759ned/Geslacht",
            EntityKind::Leeftijd => "03759ned/Leeftijd",
            EntityKind::Perioden => "03759ned/Perioden",
            EntityKind::Regios => "03759ned/RegioS",
            EntityKind::Bevolking => "03759ned/TypedDataSet",
            EntityKind::Bodemgebruik => "70262ned/TypedDataSet",
        }
    }

    pub fn is_fact(self) -> bool {
        matches!(self, EntityKind::Bevolking | EntityKind::Bodemgebruik)
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            EntityKind::Burgstaat => BURGSTAAT_FIELDS,
            EntityKind::CategoryGroup => CATEGORYGROUP_FIELDS,
            EntityKind::Geslacht => GESLACHT_FIELDS,
            EntityKind::Leeftijd => LEEFTIJD_FIELDS,
            EntityKind::Perioden => PERIODEN_FIELDS,
            EntityKind::Regios => REGIOS_FIELDS,
            EntityKind::Bevolking => BEVOLKING_FIELDS,
            EntityKind::Bodemgebruik => BODEMGEBRUIK_FIELDS,
        }
    }

    pub fn primary_key(self) -> &'static FieldSpec {
        &self.fields()[0]
    }

    /// Index of the `regio_key` column for fact entities; merge drops rows
    /// whose region is outside the locally known set.
    pub fn region_field(self) -> Option<usize> {
        if !self.is_fact() {
            return None;
        }
        self.fields().iter().position(|f| f.column == "regio_key")
    }
}

const BURGSTAAT_FIELDS: &[FieldSpec] = &[
    text("Key", "burgst_key"),
    text("Title", "burgerlijkestaat"),
    text("Description", "description"),
    int("CategoryGroupID", "categorygroupid"),
];

const CATEGORYGROUP_FIELDS: &[FieldSpec] = &[
    int("ID", "catgroup_key"),
    text("DimensionKey", "dimensionkey"),
    text("Title", "catgroup"),
    text("Description", "description"),
    int("ParentID", "parentid"),
];

const GESLACHT_FIELDS: &[FieldSpec] = &[
    text("Key", "geslacht_key"),
    text("Title", "geslacht"),
    text("Description", "description"),
    int("CategoryGroupID", "categorygroupid"),
];

const LEEFTIJD_FIELDS: &[FieldSpec] = &[
    int("Key", "leeftijd_key"),
    text("Title", "leeftijd"),
    text("Description", "description"),
    int("CategoryGroupID", "categorygroupid"),
];

const PERIODEN_FIELDS: &[FieldSpec] = &[
    text("Key", "datum_key"),
    int("Title", "jaar"),
    text("Description", "description"),
    text("Status", "status"),
];

const REGIOS_FIELDS: &[FieldSpec] = &[
    text("Key", "regio_key"),
    text("Title", "regio"),
    text("Description", "description"),
    int("CategoryGroupID", "categorygroupid"),
];

const BEVOLKING_FIELDS: &[FieldSpec] = &[
    int("ID", "id"),
    text("Geslacht", "geslacht_key"),
    int("Leeftijd", "leeftijd_key"),
    text("BurgerlijkeStaat", "burgst_key"),
    text("RegioS", "regio_key"),
    text("Perioden", "datum_key"),
    int("BevolkingOp1Januari_1", "bevolking_1_januari"),
    float("GemiddeldeBevolking_2", "gemiddelde_bevolking"),
];

const BODEMGEBRUIK_FIELDS: &[FieldSpec] = &[
    int("ID", "id"),
    text("RegioS", "regio_key"),
    text("Perioden", "datum_key"),
    int("TotaleOppervlakte_1", "totale_oppervlakte"),
    int("TotaalVerkeersterrein_2", "totaal_verkeersterrein"),
    int("Spoorterrein_3", "spoorterrein"),
    int("Wegverkeersterrein_4", "wegverkeersterrein"),
    int("Vliegveld_5", "vliegveld"),
    int("TotaalBebouwdTerrein_6", "totaal_bebouwd_terrein"),
    int("Woonterrein_7", "woonterrein"),
    int("TerreinVoorDetailhandelEnHoreca_8", "terrein_voor_detailhandel_en_horeca"),
    int("TerreinVoorOpenbareVoorzieningen_9", "terrein_voor_openbare_voorzieningen"),
    int("TerreinVoorSociaalCultureleVoorz_10", "terrein_voor_sociaal_culturele_voorz"),
    int("Bedrijventerrein_11", "bedrijventerrein"),
    int("TotaalSemiBebouwdTerrein_12", "totaal_semi_bebouwd_terrein"),
    int("Stortplaats_13", "stortplaats"),
    int("Wrakkenopslagplaats_14", "wrakkenopslagplaats"),
    int("Begraafplaats_15", "begraafplaats"),
    int("Delfstofwinplaats_16", "delfstofwinplaats"),
    int("Bouwterrein_17", "bouwterrein"),
    int("SemiVerhardOverigTerrein_18", "semi_verhard_overig_terrein"),
    int("TotaalRecreatieterrein_19", "totaal_recreatieterrein"),
    int("ParkEnPlantsoen_20", "park_en_plantsoen"),
    int("Sportterrein_21", "sportterrein"),
    int("Volkstuin_22", "volkstuin"),
    int("DagrecreatiefTerrein_23", "dagrecreatief_terrein"),
    int("VerblijfsrecreatiefTerrein_24", "verblijfsrecreatief_terrein"),
    int("TotaalAgrarischTerrein_25", "totaal_agrarisch_terrein"),
    int("TerreinVoorGlastuinbouw_26", "terrein_voor_glastuinbouw"),
    int("OverigAgrarischTerrein_27", "overig_agrarisch_terrein"),
    int("TotaalBosEnOpenNatuurlijkTerrein_28", "totaal_bos_en_open_natuurlijk_terrein"),
    int("Bos_29", "bos"),
    int("OpenDroogNatuurlijkTerrein_30", "open_droog_natuurlijk_terrein"),
    int("OpenNatNatuurlijkTerrein_31", "open_nat_natuurlijk_terrein"),
    int("TotaalBinnenwater_32", "totaal_binnenwater"),
    int("IJsselmeerMarkermeer_33", "ijsselmeer_markermeer"),
    int("AfgeslotenZeearm_34", "afgesloten_zeearm"),
    int("RijnEnMaas_35", "rijn_en_maas"),
    int("Randmeer_36", "randmeer"),
    int("Spaarbekken_37", "spaarbekken"),
    int("RecreatiefBinnenwater_38", "recreatief_binnenwater"),
    int("BinnenwaterVoorDelfstofwinning_39", "binnenwater_voor_delfstofwinning"),
    int("VloeiEnOfSlibveld_40", "vloei_en_of_slibveld"),
    int("OverigBinnenwater_41", "overig_binnenwater"),
    int("TotaalBuitenwater_42", "totaal_buitenwater"),
    int("WaddenzeeEemsDollard_43", "waddenzee_eems_dollard"),
    int("Oosterschelde_44", "oosterschelde"),
    int("Westerschelde_45", "westerschelde"),
    int("Noordzee_46", "noordzee"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [EntityKind; 8] = [
        EntityKind::Burgstaat,
        EntityKind::CategoryGroup,
        EntityKind::Geslacht,
        EntityKind::Leeftijd,
        EntityKind::Perioden,
        EntityKind::Regios,
        EntityKind::Bevolking,
        EntityKind::Bodemgebruik,
    ];

    #[test]
    fn test_mapping_tables_are_well_formed() {
        for kind in ALL {
            let fields = kind.fields();
            assert!(!fields.is_empty(), "{:?} has no fields", kind);

            let remotes: HashSet<&str> = fields.iter().map(|f| f.remote).collect();
            assert_eq!(remotes.len(), fields.len(), "{:?} duplicate remote", kind);

            let columns: HashSet<&str> = fields.iter().map(|f| f.column).collect();
            assert_eq!(columns.len(), fields.len(), "{:?} duplicate column", kind);
        }
    }

    #[test]
    fn test_primary_key_is_first_field() {
        assert_eq!(EntityKind::Burgstaat.primary_key().column, "burgst_key");
        assert_eq!(EntityKind::CategoryGroup.primary_key().column, "catgroup_key");
        assert_eq!(EntityKind::Bevolking.primary_key().column, "id");
        assert_eq!(EntityKind::Bodemgebruik.primary_key().column, "id");
    }

    #[test]
    fn test_expected_field_counts() {
        assert_eq!(EntityKind::Burgstaat.fields().len(), 4);
        assert_eq!(EntityKind::CategoryGroup.fields().len(), 5);
        assert_eq!(EntityKind::Perioden.fields().len(), 4);
        assert_eq!(EntityKind::Bevolking.fields().len(), 8);
        // id + two keys + 45 hectare measures
        assert_eq!(EntityKind::Bodemgebruik.fields().len(), 48);
    }

    #[test]
    fn test_facts_have_region_field() {
        for kind in FACTS {
            let idx = kind.region_field().expect("fact without regio_key");
            assert_eq!(kind.fields()[idx].column, "regio_key");
        }
        for kind in DIMENSIONS {
            assert!(kind.region_field().is_none());
        }
    }
}
